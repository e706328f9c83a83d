//! Free locomotion vs. the approach-and-settle interaction routine.
//!
//! The routine is an explicit state value advanced once per tick. It never
//! touches the window itself; each tick it only decides which goal command
//! the frame driver applies and where the occupancy sensor looks.

use crate::config::InteractionConfig;
use crate::controller::Controller;
use crate::math::{look_rotation, planar, Transform};
use crate::model::{LatentModel, NormalizationStats};
use crate::navigation::{plan_or_warn, PathOracle};
use crate::noise::LatentSampler;
use crate::sensor::{CollisionScene, OccupancySensor};
use crate::window::TimeWindow;
use anyhow::{anyhow, Context};
use glam::Vec3;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactPose {
    pub name: String,
    pub transform: Transform,
}

/// Scene affordance (chair, bed, ...) exposing named contact poses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub id: String,
    pub center: Transform,
    /// Full size of the sensed volume around the centre.
    pub extents: Vec3,
    #[serde(default)]
    pub contacts: Vec<ContactPose>,
}

impl Interaction {
    pub fn contact(&self, name: &str) -> Option<&ContactPose> {
        self.contacts.iter().find(|contact| contact.name == name)
    }
}

/// Proposes the target contact pose for an interaction.
pub trait ContactOracle: Send {
    fn predict_contact(
        &mut self,
        interaction: &Interaction,
        scene: &dyn CollisionScene,
    ) -> anyhow::Result<Transform>;
}

/// Learned hip-contact proposal conditioned on the interaction's geometry.
pub struct LearnedContactOracle<M: LatentModel> {
    model: M,
    input: NormalizationStats,
    output: NormalizationStats,
    resolution: [usize; 3],
    latent: Vec<f32>,
    sampler: LatentSampler,
}

impl<M: LatentModel> LearnedContactOracle<M> {
    pub const OUTPUT_DIM: usize = 6;

    pub fn new(
        model: M,
        input: NormalizationStats,
        output: NormalizationStats,
        resolution: [usize; 3],
        latent_dim: usize,
        sampler: LatentSampler,
    ) -> anyhow::Result<Self> {
        let cells: usize = resolution.iter().product();
        anyhow::ensure!(
            input.dim() == cells * 4,
            "contact oracle input statistics cover {} values, grid needs {}",
            input.dim(),
            cells * 4
        );
        anyhow::ensure!(
            output.dim() == Self::OUTPUT_DIM,
            "contact oracle output statistics cover {} values, expected {}",
            output.dim(),
            Self::OUTPUT_DIM
        );
        Ok(Self {
            model,
            input,
            output,
            resolution,
            latent: vec![0.0; latent_dim],
            sampler,
        })
    }

    /// Geometry conditioning: per cell the reference point relative to the
    /// centre followed by its occupancy.
    fn condition(&self, interaction: &Interaction, scene: &dyn CollisionScene) -> Vec<f32> {
        let mut sensor = OccupancySensor::new(self.resolution);
        sensor.sense(&interaction.center, scene, interaction.extents, 0.0);
        let mut values = Vec::with_capacity(sensor.cell_count() * 4);
        for (reference, occupancy) in sensor.references().iter().zip(sensor.occupancies()) {
            let local = interaction.center.to_local_position(*reference);
            values.extend_from_slice(&[local.x, local.y, local.z, *occupancy]);
        }
        values
    }
}

impl<M: LatentModel> ContactOracle for LearnedContactOracle<M> {
    fn predict_contact(
        &mut self,
        interaction: &Interaction,
        scene: &dyn CollisionScene,
    ) -> anyhow::Result<Transform> {
        let mut condition = self.condition(interaction, scene);
        self.input.normalize(&mut condition);
        self.sampler.fill_normal(&mut self.latent, 0.0, 1.0);
        let mut output = self
            .model
            .execute(&[&condition], &self.latent)
            .with_context(|| format!("contact model '{}' failed", self.model.name()))?;
        anyhow::ensure!(
            output.len() == Self::OUTPUT_DIM,
            "contact model produced {} values, expected {}",
            output.len(),
            Self::OUTPUT_DIM
        );
        self.output.unnormalize(&mut output);
        let position = interaction
            .center
            .to_world_position(Vec3::new(output[0], output[1], output[2]));
        let forward = interaction
            .center
            .to_world_direction(Vec3::new(output[3], output[4], output[5]));
        Ok(Transform::new(position, look_rotation(planar(forward), Vec3::Y)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Free,
    Interacting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutinePhase {
    /// Interaction signal held: walking to and settling into the target.
    Approach,
    /// Signal released: waiting for the predictor to leave the pose.
    Settle,
}

/// Blender call chosen for this tick.
#[derive(Debug, Clone, PartialEq)]
pub enum GoalCommand {
    Static {
        position: Vec3,
        direction: Vec3,
        actions: Vec<f32>,
    },
    Dynamic {
        root: Transform,
        move_vector: Vec3,
        turn: f32,
        actions: Vec<f32>,
    },
}

/// Cuboid the occupancy sensor samples this tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SenseRegion {
    pub pivot: Transform,
    pub size: Vec3,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub command: GoalCommand,
    pub sense: SenseRegion,
}

pub struct TickContext<'a> {
    pub controller: &'a Controller,
    pub signals: &'a [f32],
    pub window: &'a TimeWindow,
    pub interactions: &'a [Interaction],
    pub scene: &'a dyn CollisionScene,
    /// Sensor extent used in free locomotion.
    pub free_sense_size: Vec3,
}

/// Resumable state of one approach-and-settle routine.
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionRoutine {
    signal: String,
    interaction: Interaction,
    target: Transform,
    phase: RoutinePhase,
    engaged: bool,
    path_requested: bool,
    has_path: bool,
}

impl InteractionRoutine {
    pub fn signal(&self) -> &str {
        &self.signal
    }

    pub fn interaction(&self) -> &Interaction {
        &self.interaction
    }

    pub fn target(&self) -> Transform {
        self.target
    }

    pub fn phase(&self) -> RoutinePhase {
        self.phase
    }

    /// Whether the predictor has reported the interaction style above the
    /// exit threshold at least once.
    pub fn engaged(&self) -> bool {
        self.engaged
    }

    fn sense_region(&self) -> SenseRegion {
        SenseRegion {
            pivot: self.interaction.center,
            size: self.interaction.extents,
        }
    }
}

pub struct ModeController {
    config: InteractionConfig,
    walk_intent: Vec<f32>,
    routine: Option<InteractionRoutine>,
    contact_oracle: Option<Box<dyn ContactOracle>>,
    path_oracle: Option<Box<dyn PathOracle + Send>>,
}

impl ModeController {
    pub fn new(config: InteractionConfig, actions: &[String]) -> Self {
        let walk_intent = actions
            .iter()
            .map(|name| if *name == config.walk_action { 1.0 } else { 0.0 })
            .collect();
        Self {
            config,
            walk_intent,
            routine: None,
            contact_oracle: None,
            path_oracle: None,
        }
    }

    pub fn with_contact_oracle(mut self, oracle: Box<dyn ContactOracle>) -> Self {
        self.contact_oracle = Some(oracle);
        self
    }

    pub fn with_path_oracle(mut self, oracle: Box<dyn PathOracle + Send>) -> Self {
        self.path_oracle = Some(oracle);
        self
    }

    pub fn mode(&self) -> Mode {
        if self.routine.is_some() {
            Mode::Interacting
        } else {
            Mode::Free
        }
    }

    pub fn routine(&self) -> Option<&InteractionRoutine> {
        self.routine.as_ref()
    }

    pub fn waypoints(&self) -> &[Vec3] {
        self.path_oracle
            .as_ref()
            .map(|oracle| oracle.waypoints())
            .unwrap_or(&[])
    }

    /// External reset: abandons any routine and clears the path.
    pub fn reset(&mut self) {
        if let Some(routine) = self.routine.take() {
            info!(
                target: "locomotion_core::interaction",
                signal = routine.signal.as_str(),
                "interaction reset"
            );
        }
        if let Some(path) = self.path_oracle.as_mut() {
            path.reset();
        }
    }

    /// Chooses this tick's goal command. Runs before the feed.
    pub fn decide(&mut self, ctx: &TickContext<'_>) -> anyhow::Result<Decision> {
        let pivot = ctx.window.pivot();
        if let Some(mut routine) = self.routine.take() {
            let held = ctx.controller.query_signal(&routine.signal);
            if routine.phase == RoutinePhase::Approach && held {
                let command = self.approach(&mut routine, ctx);
                let sense = routine.sense_region();
                self.routine = Some(routine);
                return Ok(Decision { command, sense });
            }
            if routine.phase == RoutinePhase::Approach {
                debug!(
                    target: "locomotion_core::interaction",
                    signal = routine.signal.as_str(),
                    "signal released; settling"
                );
                routine.phase = RoutinePhase::Settle;
                if let Some(path) = self.path_oracle.as_mut() {
                    path.reset();
                }
            }
            let style = ctx
                .window
                .style()
                .value(pivot, &routine.signal)
                .unwrap_or(0.0);
            if style > self.config.exit_threshold {
                let command = free_dynamic(ctx);
                let sense = routine.sense_region();
                self.routine = Some(routine);
                return Ok(Decision { command, sense });
            }
            self.finish(routine);
        } else if let Some(signal) = self
            .config
            .signals
            .iter()
            .find(|signal| ctx.controller.query_signal(signal))
            .cloned()
        {
            if let Some(interaction) = select_interaction(ctx) {
                let mut routine = self.begin(signal, interaction.clone(), ctx)?;
                let command = self.approach(&mut routine, ctx);
                let sense = routine.sense_region();
                self.routine = Some(routine);
                return Ok(Decision { command, sense });
            }
            debug!(
                target: "locomotion_core::interaction",
                signal = signal.as_str(),
                "no interaction available; staying in free locomotion"
            );
        }
        Ok(self.free(ctx))
    }

    /// Exit check against the freshly read style channel. Runs after Read so
    /// the switch back to free locomotion lands on the same tick.
    pub fn observe(&mut self, window: &TimeWindow) {
        let Some(routine) = self.routine.as_mut() else {
            return;
        };
        let style = window
            .style()
            .value(window.pivot(), &routine.signal)
            .unwrap_or(0.0);
        if style > self.config.exit_threshold {
            routine.engaged = true;
            return;
        }
        if routine.engaged || routine.phase == RoutinePhase::Settle {
            if let Some(routine) = self.routine.take() {
                self.finish(routine);
            }
        }
    }

    fn begin(
        &mut self,
        signal: String,
        interaction: Interaction,
        ctx: &TickContext<'_>,
    ) -> anyhow::Result<InteractionRoutine> {
        let target = match self.contact_oracle.as_mut() {
            Some(oracle) if self.config.use_contact_oracle => oracle
                .predict_contact(&interaction, ctx.scene)
                .with_context(|| format!("contact prediction for {} failed", interaction.id))?,
            _ => interaction
                .contact(&self.config.target_contact)
                .map(|contact| contact.transform)
                .ok_or_else(|| {
                    anyhow!(
                        "interaction {} has no {} contact",
                        interaction.id,
                        self.config.target_contact
                    )
                })?,
        };
        info!(
            target: "locomotion_core::interaction",
            signal = signal.as_str(),
            interaction = interaction.id.as_str(),
            x = target.position.x,
            z = target.position.z,
            "interaction started"
        );
        Ok(InteractionRoutine {
            signal,
            interaction,
            target,
            phase: RoutinePhase::Approach,
            engaged: false,
            path_requested: false,
            has_path: false,
        })
    }

    fn approach(&mut self, routine: &mut InteractionRoutine, ctx: &TickContext<'_>) -> GoalCommand {
        let settle = GoalCommand::Static {
            position: routine.target.position,
            direction: routine.target.forward(),
            actions: ctx.signals.to_vec(),
        };
        if !self.config.use_path_planning {
            return settle;
        }
        let Some(path) = self.path_oracle.as_mut() else {
            return settle;
        };
        let root = ctx.window.pivot_root();
        if !routine.path_requested {
            routine.path_requested = true;
            routine.has_path = plan_or_warn(&mut **path, root.position, routine.target.position);
        }
        if !routine.has_path {
            return settle;
        }
        let forward = root.forward();
        let mut move_vector = Vec3::ZERO;
        let mut turn = 0.0;
        if !path.final_target_reached() {
            move_vector = path.next_move(root.position, forward, routine.target.position);
            turn = path.next_turn(root.position, forward);
        }
        if path.final_target_reached() {
            settle
        } else {
            GoalCommand::Dynamic {
                root,
                move_vector,
                turn,
                actions: self.walk_intent.clone(),
            }
        }
    }

    fn free(&self, ctx: &TickContext<'_>) -> Decision {
        let root = ctx.window.pivot_root();
        let command = match ctx.controller.input().projection.as_ref() {
            Some(projection) => GoalCommand::Static {
                position: projection.point,
                direction: planar(projection.point - root.position),
                actions: ctx.signals.to_vec(),
            },
            None => free_dynamic(ctx),
        };
        Decision {
            command,
            sense: SenseRegion {
                pivot: root,
                size: ctx.free_sense_size,
            },
        }
    }

    fn finish(&mut self, routine: InteractionRoutine) {
        if let Some(path) = self.path_oracle.as_mut() {
            path.reset();
        }
        info!(
            target: "locomotion_core::interaction",
            signal = routine.signal.as_str(),
            interaction = routine.interaction.id.as_str(),
            "interaction finished"
        );
    }
}

fn free_dynamic(ctx: &TickContext<'_>) -> GoalCommand {
    GoalCommand::Dynamic {
        root: ctx.window.pivot_root(),
        move_vector: ctx.controller.query_move(ctx.signals),
        turn: ctx.controller.query_turn(),
        actions: ctx.signals.to_vec(),
    }
}

/// The clicked interaction if any, otherwise the closest one to the root.
fn select_interaction<'a>(ctx: &TickContext<'a>) -> Option<&'a Interaction> {
    if let Some(id) = ctx
        .controller
        .input()
        .projection
        .as_ref()
        .and_then(|projection| projection.interaction.as_deref())
    {
        if let Some(interaction) = ctx.interactions.iter().find(|candidate| candidate.id == id) {
            return Some(interaction);
        }
    }
    let root = ctx.window.pivot_root().position;
    ctx.interactions.iter().min_by(|a, b| {
        let da = planar_distance_squared(a.center.position, root);
        let db = planar_distance_squared(b.center.position, root);
        da.total_cmp(&db)
    })
}

fn planar_distance_squared(a: Vec3, b: Vec3) -> f32 {
    let dx = a.x - b.x;
    let dz = a.z - b.z;
    dx * dx + dz * dz
}
