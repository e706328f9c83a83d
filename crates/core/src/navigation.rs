//! Waypoint planning for the interaction approach.
//!
//! `PathOracle` is the narrow surface the interaction routine steers by.
//! `WaypointPlanner` implements it over any `NavigationMesh`; `GridNavMesh`
//! is a planar occupancy grid searched with A*.

use crate::config::NavigationConfig;
use crate::math::{angle_degrees, signed_angle_degrees};
use crate::sensor::Aabb;
use anyhow::anyhow;
use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use tracing::{debug, warn};

pub trait PathOracle {
    /// Plans a fresh path. Failures leave the oracle without a path.
    fn compute_path(&mut self, from: Vec3, to: Vec3) -> anyhow::Result<()>;
    /// Local move request toward the current waypoint (`+Z` = forward).
    /// Once the path is used up this returns `final_target` and flags
    /// arrival.
    fn next_move(&mut self, root: Vec3, forward: Vec3, final_target: Vec3) -> Vec3;
    /// Turn request in degrees toward the current waypoint.
    fn next_turn(&mut self, root: Vec3, forward: Vec3) -> f32;
    fn has_path(&self) -> bool;
    fn final_target_reached(&self) -> bool;
    fn waypoints(&self) -> &[Vec3];
    fn reset(&mut self);
}

/// Walkable-surface queries a planner needs.
pub trait NavigationMesh {
    /// Closest navigable point within `radius` of `point`.
    fn sample_position(&self, point: Vec3, radius: f32) -> Option<Vec3>;
    /// Corner points of a path between two navigable points, endpoints
    /// included.
    fn corners(&self, from: Vec3, to: Vec3) -> Option<Vec<Vec3>>;
}

pub struct WaypointPlanner<N: NavigationMesh> {
    mesh: N,
    config: NavigationConfig,
    waypoints: Vec<Vec3>,
    current: usize,
    final_reached: bool,
}

impl<N: NavigationMesh> WaypointPlanner<N> {
    pub fn new(mesh: N, config: NavigationConfig) -> Self {
        Self {
            mesh,
            config,
            waypoints: Vec::new(),
            current: 0,
            final_reached: false,
        }
    }

    pub fn mesh(&self) -> &N {
        &self.mesh
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    /// Drops intermediate waypoints that sit close to the final target.
    fn prune(&self, waypoints: Vec<Vec3>) -> Vec<Vec3> {
        let Some(last) = waypoints.last().copied() else {
            return waypoints;
        };
        if waypoints.len() <= 2 {
            return waypoints;
        }
        let mut pruned = Vec::with_capacity(waypoints.len());
        pruned.push(waypoints[0]);
        for point in &waypoints[1..waypoints.len() - 1] {
            if point.distance(last) > self.config.prune_distance {
                pruned.push(*point);
            }
        }
        pruned.push(last);
        pruned
    }
}

fn planar_distance(a: Vec3, b: Vec3) -> f32 {
    Vec2::new(a.x - b.x, a.z - b.z).length()
}

impl<N: NavigationMesh> PathOracle for WaypointPlanner<N> {
    fn compute_path(&mut self, from: Vec3, to: Vec3) -> anyhow::Result<()> {
        self.reset();
        let start = self
            .mesh
            .sample_position(from, self.config.sample_radius)
            .ok_or_else(|| anyhow!("no navigable point near start {from}"))?;
        let goal = self
            .mesh
            .sample_position(to, self.config.sample_radius)
            .ok_or_else(|| anyhow!("no navigable point near target {to}"))?;
        let mut corners = self
            .mesh
            .corners(start, goal)
            .ok_or_else(|| anyhow!("no path from {start} to {goal}"))?;
        if corners.len() < 2 {
            corners = vec![start, goal];
        }
        let last = corners.len() - 1;
        corners[0] = from;
        corners[last] = to;
        self.waypoints = self.prune(corners);
        debug!(
            target: "locomotion_core::navigation",
            waypoints = self.waypoints.len(),
            "computed path"
        );
        Ok(())
    }

    fn next_move(&mut self, root: Vec3, forward: Vec3, final_target: Vec3) -> Vec3 {
        if self.waypoints.is_empty() {
            return Vec3::ZERO;
        }
        if self.final_reached || self.current >= self.waypoints.len() - 1 {
            self.final_reached = true;
            return final_target;
        }
        let next = self.waypoints[self.current];
        if planar_distance(root, next) <= self.config.move_reach {
            self.current += 1;
        }
        let to_target = Vec3::new(next.x - root.x, 0.0, next.z - root.z);
        if angle_degrees(forward, to_target) < self.config.forward_cone_degrees {
            Vec3::Z
        } else {
            Vec3::ZERO
        }
    }

    fn next_turn(&mut self, root: Vec3, forward: Vec3) -> f32 {
        if self.waypoints.is_empty() {
            return 0.0;
        }
        let last = self.waypoints.len() - 1;
        let next = self.waypoints[self.current.min(last)];
        if planar_distance(root, next) <= self.config.turn_reach {
            self.current = (self.current + 1).min(last);
        }
        let to_target = Vec3::new(next.x - root.x, 0.0, next.z - root.z);
        let angle = signed_angle_degrees(Vec3::new(forward.x, 0.0, forward.z), to_target, Vec3::Y);
        if angle > self.config.turn_dead_zone_degrees {
            self.config.turn_degrees
        } else if angle < -self.config.turn_dead_zone_degrees {
            -self.config.turn_degrees
        } else {
            0.0
        }
    }

    fn has_path(&self) -> bool {
        !self.waypoints.is_empty()
    }

    fn final_target_reached(&self) -> bool {
        self.final_reached
    }

    fn waypoints(&self) -> &[Vec3] {
        &self.waypoints
    }

    fn reset(&mut self) {
        self.waypoints.clear();
        self.current = 0;
        self.final_reached = false;
    }
}

/// Planar walkable region. Boxes become obstacles when they intersect the
/// body's height band.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationBounds {
    pub min: Vec2,
    pub max: Vec2,
    #[serde(default = "NavigationBounds::default_clearance")]
    pub floor_clearance: f32,
    #[serde(default = "NavigationBounds::default_height")]
    pub agent_height: f32,
}

impl NavigationBounds {
    fn default_clearance() -> f32 {
        0.05
    }

    fn default_height() -> f32 {
        1.8
    }
}

impl Default for NavigationBounds {
    fn default() -> Self {
        Self {
            min: Vec2::splat(-10.0),
            max: Vec2::splat(10.0),
            floor_clearance: Self::default_clearance(),
            agent_height: Self::default_height(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct GridCell {
    x: i32,
    z: i32,
}

#[derive(Debug, Clone)]
pub struct GridNavMesh {
    origin: Vec2,
    cell_size: f32,
    width_cells: usize,
    depth_cells: usize,
    blocked: Vec<u8>,
}

impl GridNavMesh {
    pub fn new(bounds: &NavigationBounds, obstacles: &[Aabb], cell_size: f32) -> Self {
        let cell_size = cell_size.max(0.05);
        let extent = (bounds.max - bounds.min).max(Vec2::splat(cell_size));
        let width_cells = ((extent.x / cell_size).ceil() as usize).max(1);
        let depth_cells = ((extent.y / cell_size).ceil() as usize).max(1);
        let mut mesh = Self {
            origin: bounds.min,
            cell_size,
            width_cells,
            depth_cells,
            blocked: vec![0u8; width_cells * depth_cells],
        };
        for obstacle in obstacles {
            if obstacle.max.y <= bounds.floor_clearance || obstacle.min.y >= bounds.agent_height {
                continue;
            }
            mesh.mark_obstacle(obstacle);
        }
        mesh
    }

    pub fn is_walkable(&self, point: Vec3) -> bool {
        self.point_to_cell(point)
            .map(|cell| !self.is_blocked(cell))
            .unwrap_or(false)
    }

    fn mark_obstacle(&mut self, obstacle: &Aabb) {
        let start_x = ((obstacle.min.x - self.origin.x) / self.cell_size).floor() as i32;
        let end_x = ((obstacle.max.x - self.origin.x) / self.cell_size).ceil() as i32;
        let start_z = ((obstacle.min.z - self.origin.y) / self.cell_size).floor() as i32;
        let end_z = ((obstacle.max.z - self.origin.y) / self.cell_size).ceil() as i32;
        for z in start_z..end_z {
            for x in start_x..end_x {
                if let Some(idx) = self.index(GridCell { x, z }) {
                    self.blocked[idx] = 1;
                }
            }
        }
    }

    fn point_to_cell(&self, point: Vec3) -> Option<GridCell> {
        if !point.is_finite() {
            return None;
        }
        let x = ((point.x - self.origin.x) / self.cell_size).floor() as i32;
        let z = ((point.z - self.origin.y) / self.cell_size).floor() as i32;
        let cell = GridCell { x, z };
        self.index(cell).map(|_| cell)
    }

    fn index(&self, cell: GridCell) -> Option<usize> {
        if cell.x < 0
            || cell.z < 0
            || cell.x >= self.width_cells as i32
            || cell.z >= self.depth_cells as i32
        {
            return None;
        }
        Some(cell.z as usize * self.width_cells + cell.x as usize)
    }

    fn is_blocked(&self, cell: GridCell) -> bool {
        self.index(cell)
            .and_then(|idx| self.blocked.get(idx))
            .map(|value| *value != 0)
            .unwrap_or(true)
    }

    fn cell_center(&self, cell: GridCell) -> Vec3 {
        Vec3::new(
            self.origin.x + (cell.x as f32 + 0.5) * self.cell_size,
            0.0,
            self.origin.y + (cell.z as f32 + 0.5) * self.cell_size,
        )
    }

    fn nearest_free_cell(&self, start: GridCell) -> Option<GridCell> {
        let idx = self.index(start)?;
        if self.blocked[idx] == 0 {
            return Some(start);
        }
        let mut visited = vec![false; self.blocked.len()];
        let mut queue = VecDeque::new();
        visited[idx] = true;
        queue.push_back(start);
        const DIRS: [(i32, i32); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];
        while let Some(cell) = queue.pop_front() {
            for (dx, dz) in DIRS {
                let neighbor = GridCell {
                    x: cell.x + dx,
                    z: cell.z + dz,
                };
                let Some(idx) = self.index(neighbor) else {
                    continue;
                };
                if visited[idx] {
                    continue;
                }
                visited[idx] = true;
                if self.blocked[idx] == 0 {
                    return Some(neighbor);
                }
                queue.push_back(neighbor);
            }
        }
        None
    }

    fn neighbors(&self, cell: GridCell) -> Vec<(GridCell, f32)> {
        const DIRS: [(i32, i32, f32); 8] = [
            (1, 0, 1.0),
            (-1, 0, 1.0),
            (0, 1, 1.0),
            (0, -1, 1.0),
            (1, 1, std::f32::consts::SQRT_2),
            (1, -1, std::f32::consts::SQRT_2),
            (-1, 1, std::f32::consts::SQRT_2),
            (-1, -1, std::f32::consts::SQRT_2),
        ];
        let mut neighbors = Vec::with_capacity(8);
        for (dx, dz, cost) in DIRS {
            let next = GridCell {
                x: cell.x + dx,
                z: cell.z + dz,
            };
            if self.is_blocked(next) {
                continue;
            }
            // no corner cutting past blocked cells
            if dx != 0
                && dz != 0
                && (self.is_blocked(GridCell { x: cell.x + dx, z: cell.z })
                    || self.is_blocked(GridCell { x: cell.x, z: cell.z + dz }))
            {
                continue;
            }
            neighbors.push((next, cost));
        }
        neighbors
    }

    fn run_a_star(&self, start: GridCell, goal: GridCell) -> Option<Vec<GridCell>> {
        if start == goal {
            return Some(vec![start]);
        }
        let mut open = BinaryHeap::new();
        open.push(OpenNode {
            cell: start,
            f_score: heuristic(start, goal),
            g_score: 0.0,
        });
        let mut came_from = vec![None; self.blocked.len()];
        let mut g_score = vec![f32::INFINITY; self.blocked.len()];
        g_score[self.index(start)?] = 0.0;

        while let Some(current) = open.pop() {
            if current.cell == goal {
                return Some(self.reconstruct_path(&came_from, current.cell));
            }
            for (neighbor, step_cost) in self.neighbors(current.cell) {
                let Some(idx) = self.index(neighbor) else {
                    continue;
                };
                let tentative_g = current.g_score + step_cost;
                if tentative_g + 1e-6 >= g_score[idx] {
                    continue;
                }
                came_from[idx] = Some(current.cell);
                g_score[idx] = tentative_g;
                open.push(OpenNode {
                    cell: neighbor,
                    f_score: tentative_g + heuristic(neighbor, goal),
                    g_score: tentative_g,
                });
            }
        }
        None
    }

    fn reconstruct_path(&self, came_from: &[Option<GridCell>], mut current: GridCell) -> Vec<GridCell> {
        let mut path = vec![current];
        while let Some(idx) = self.index(current) {
            match came_from[idx] {
                Some(prev) => {
                    current = prev;
                    path.push(current);
                }
                None => break,
            }
        }
        path.reverse();
        path
    }
}

impl NavigationMesh for GridNavMesh {
    fn sample_position(&self, point: Vec3, radius: f32) -> Option<Vec3> {
        let cell = self.point_to_cell(point)?;
        if !self.is_blocked(cell) {
            return Some(Vec3::new(point.x, 0.0, point.z));
        }
        let free = self.nearest_free_cell(cell)?;
        let center = self.cell_center(free);
        (planar_distance(center, point) <= radius).then_some(center)
    }

    fn corners(&self, from: Vec3, to: Vec3) -> Option<Vec<Vec3>> {
        let start = self.point_to_cell(from)?;
        let goal = self.point_to_cell(to)?;
        let cells = self.run_a_star(start, goal)?;
        let mut corners = vec![from];
        // keep only cells where the walking direction changes
        for window in cells.windows(3) {
            let first = (window[1].x - window[0].x, window[1].z - window[0].z);
            let second = (window[2].x - window[1].x, window[2].z - window[1].z);
            if first != second {
                corners.push(self.cell_center(window[1]));
            }
        }
        corners.push(to);
        Some(corners)
    }
}

#[derive(Debug, Clone, Copy)]
struct OpenNode {
    cell: GridCell,
    f_score: f32,
    g_score: f32,
}

impl PartialEq for OpenNode {
    fn eq(&self, other: &Self) -> bool {
        self.cell == other.cell
    }
}

impl Eq for OpenNode {}

impl PartialOrd for OpenNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OpenNode {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .f_score
            .partial_cmp(&self.f_score)
            .or_else(|| other.g_score.partial_cmp(&self.g_score))
            .unwrap_or(Ordering::Equal)
    }
}

fn heuristic(a: GridCell, b: GridCell) -> f32 {
    let dx = (a.x - b.x) as f32;
    let dz = (a.z - b.z) as f32;
    (dx * dx + dz * dz).sqrt()
}

/// Computes a path, logging a failure and reporting it as "no path".
pub fn plan_or_warn(oracle: &mut dyn PathOracle, from: Vec3, to: Vec3) -> bool {
    match oracle.compute_path(from, to) {
        Ok(()) => true,
        Err(err) => {
            warn!(
                target: "locomotion_core::navigation",
                error = %err,
                "path planning failed; approaching directly"
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room_with_wall() -> GridNavMesh {
        // wall across z = 0 from x = -3 to x = 2; the gap at x > 2 is closer
        let wall = Aabb::new(Vec3::new(-3.0, 0.0, -0.25), Vec3::new(2.0, 1.0, 0.25));
        GridNavMesh::new(
            &NavigationBounds {
                min: Vec2::splat(-4.0),
                max: Vec2::splat(4.0),
                ..NavigationBounds::default()
            },
            &[wall],
            0.25,
        )
    }

    #[test]
    fn a_star_routes_around_obstacles() {
        let mesh = room_with_wall();
        let corners = mesh
            .corners(Vec3::new(0.0, 0.0, -2.0), Vec3::new(0.0, 0.0, 2.0))
            .expect("path");
        assert!(corners.len() > 2);
        assert!(corners.iter().any(|point| point.x > 2.0));
        for point in &corners {
            assert!(mesh.is_walkable(*point));
        }
    }

    #[test]
    fn sample_position_snaps_out_of_obstacles() {
        let mesh = room_with_wall();
        let snapped = mesh
            .sample_position(Vec3::new(0.0, 0.5, 0.0), 1.0)
            .expect("free cell nearby");
        assert!(mesh.is_walkable(snapped));
        assert!(mesh.sample_position(Vec3::new(40.0, 0.0, 0.0), 1.0).is_none());
    }

    #[test]
    fn planner_prunes_and_substitutes_endpoints() {
        let mut planner = WaypointPlanner::new(room_with_wall(), NavigationConfig::default());
        let from = Vec3::new(0.0, 0.0, -2.0);
        let to = Vec3::new(0.0, 0.45, 2.0);
        planner.compute_path(from, to).expect("path");
        let waypoints = planner.waypoints();
        assert_eq!(waypoints[0], from);
        assert_eq!(*waypoints.last().unwrap(), to);
        for point in &waypoints[1..waypoints.len() - 1] {
            assert!(point.distance(to) > 0.5);
        }
    }

    #[test]
    fn steering_requests_forward_and_turns() {
        let mut planner = WaypointPlanner::new(room_with_wall(), NavigationConfig::default());
        planner
            .compute_path(Vec3::new(3.0, 0.0, -2.0), Vec3::new(3.0, 0.0, 2.0))
            .expect("path");
        // start waypoint is reached immediately
        let target = Vec3::new(3.0, 0.0, 2.0);
        assert_eq!(planner.next_move(Vec3::new(3.0, 0.0, -2.0), Vec3::Z, target), Vec3::Z);
        assert_eq!(planner.current_index(), 1);
        // only the final target remains
        let root = Vec3::new(3.0, 0.0, -1.0);
        assert_eq!(planner.next_move(root, Vec3::X, target), target);
        assert!(planner.final_target_reached());
        assert_eq!(planner.next_move(root, Vec3::Z, target), target);
        assert_eq!(planner.next_turn(root, Vec3::X), -90.0);
        assert_eq!(planner.next_turn(root, -Vec3::X), 90.0);
        assert_eq!(planner.next_turn(root, Vec3::Z), 0.0);
    }

    #[test]
    fn final_waypoint_flags_arrival() {
        let mut planner = WaypointPlanner::new(room_with_wall(), NavigationConfig::default());
        planner
            .compute_path(Vec3::new(3.0, 0.0, -2.0), Vec3::new(3.0, 0.0, 2.0))
            .expect("path");
        let last = planner.waypoints().len() - 1;
        for _ in 0..=last {
            let target = planner.waypoints()[planner.current_index().min(last)];
            planner.next_move(target, Vec3::Z, Vec3::new(3.0, 0.0, 2.0));
        }
        assert!(planner.final_target_reached());
        planner.reset();
        assert!(!planner.has_path());
        assert!(!planner.final_target_reached());
    }

    #[test]
    fn failed_plan_reports_no_path() {
        let mut planner = WaypointPlanner::new(room_with_wall(), NavigationConfig::default());
        assert!(!plan_or_warn(&mut planner, Vec3::new(50.0, 0.0, 0.0), Vec3::ZERO));
        assert!(!planner.has_path());
    }
}
