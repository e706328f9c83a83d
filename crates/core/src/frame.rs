//! One character, advanced one tick at a time:
//! Sense -> Decide -> Feed -> Predict -> Read -> Commit.
//!
//! Only `Commit` changes what is externally observable (the skeleton).
//! Any failure freezes the character in its last committed pose.

use crate::blender::ControlBlender;
use crate::config::ControllerConfig;
use crate::controller::{Controller, InputFrame};
use crate::interaction::{
    ContactOracle, Decision, GoalCommand, Interaction, Mode, ModeController, TickContext,
};
use crate::math::{
    clamp01_all, interpolate_transform, interpolate_weights, lerp_vec3, look_rotation,
    normalize_or_zero, slerp_vec3, Transform,
};
use crate::navigation::PathOracle;
use crate::port::{PredictorPort, ProtocolLayout, SequencePredictor};
use crate::sensor::{CollisionScene, OccupancySensor};
use crate::skeleton::Skeleton;
use crate::telemetry::{TelemetryStats, TelemetryWriter};
use crate::window::{TimeWindow, WindowLayout};
use glam::Vec3;
use std::fmt;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickPhase {
    Sense,
    Decide,
    Feed,
    Predict,
    Read,
    Commit,
}

impl fmt::Display for TickPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TickPhase::Sense => "sense",
            TickPhase::Decide => "decide",
            TickPhase::Feed => "feed",
            TickPhase::Predict => "predict",
            TickPhase::Read => "read",
            TickPhase::Commit => "commit",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CharacterStatus {
    Active,
    Frozen {
        tick: u64,
        phase: TickPhase,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Advanced,
    /// The character failed earlier; nothing was done.
    Frozen,
}

/// Scene state shared read-only with the character for one tick.
#[derive(Clone, Copy)]
pub struct World<'a> {
    pub scene: &'a dyn CollisionScene,
    pub interactions: &'a [Interaction],
}

/// Predictor estimates from the last Read that the window does not keep.
#[derive(Debug, Clone, Default)]
pub struct DebugPredictions {
    /// Bone positions predicted relative to the last window sample.
    pub inverse_pose: Vec<Vec3>,
    /// Root estimates for the pivot key and every future key.
    pub roots: Vec<Transform>,
    /// Inverse-trajectory estimates for the pivot key and every future key.
    pub goals: Vec<Transform>,
}

#[derive(Debug, Clone, Copy)]
struct BonePose {
    position: Vec3,
    forward: Vec3,
    up: Vec3,
    velocity: Vec3,
}

#[derive(Debug, Clone)]
struct Sensed {
    signals: Vec<f32>,
    user_control: f32,
    network_control: f32,
}

pub struct Character {
    config: ControllerConfig,
    protocol: ProtocolLayout,
    window: TimeWindow,
    controller: Controller,
    blender: ControlBlender,
    modes: ModeController,
    sensor: OccupancySensor,
    port: PredictorPort,
    predictor: Box<dyn SequencePredictor>,
    skeleton: Skeleton,
    debug: DebugPredictions,
    telemetry: Option<TelemetryWriter>,
    status: CharacterStatus,
    tick: u64,
}

impl Character {
    /// Validates the configuration against the skeleton and predictor
    /// dimensions. All failures here are configuration errors.
    pub fn new(
        config: ControllerConfig,
        skeleton: Skeleton,
        predictor: Box<dyn SequencePredictor>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        skeleton.matches(&config.bones)?;
        let layout = WindowLayout::new(&config.window)?;
        let window = TimeWindow::new(
            layout,
            config.styles.clone(),
            config.actions.clone(),
            config.contacts.clone(),
            skeleton.root,
        );
        let controller = Controller::new(config.signals.clone(), config.controls.clone())?;
        let protocol = ProtocolLayout::from_config(&config);
        info!(
            target: "locomotion_core::frame",
            predictor = predictor.name(),
            samples = window.layout().sample_count(),
            bones = skeleton.len(),
            input_dim = protocol.input_dim(),
            output_dim = protocol.output_dim(),
            "character created"
        );
        Ok(Self {
            blender: ControlBlender::new(config.blending.clone()),
            modes: ModeController::new(config.interaction.clone(), &config.actions),
            sensor: OccupancySensor::new(config.sensor.resolution),
            port: PredictorPort::with_layout(protocol),
            protocol,
            window,
            controller,
            predictor,
            skeleton,
            debug: DebugPredictions::default(),
            telemetry: None,
            status: CharacterStatus::Active,
            tick: 0,
            config,
        })
    }

    pub fn with_path_oracle(mut self, oracle: Box<dyn PathOracle + Send>) -> Self {
        self.modes = self.modes.with_path_oracle(oracle);
        self
    }

    pub fn with_contact_oracle(mut self, oracle: Box<dyn ContactOracle>) -> Self {
        self.modes = self.modes.with_contact_oracle(oracle);
        self
    }

    pub fn with_telemetry(mut self, writer: TelemetryWriter) -> Self {
        self.telemetry = Some(writer);
        self
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn protocol(&self) -> ProtocolLayout {
        self.protocol
    }

    pub fn skeleton(&self) -> &Skeleton {
        &self.skeleton
    }

    pub fn window(&self) -> &TimeWindow {
        &self.window
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub fn modes(&self) -> &ModeController {
        &self.modes
    }

    pub fn mode(&self) -> Mode {
        self.modes.mode()
    }

    pub fn debug_predictions(&self) -> &DebugPredictions {
        &self.debug
    }

    pub fn status(&self) -> &CharacterStatus {
        &self.status
    }

    pub fn ticks(&self) -> u64 {
        self.tick
    }

    /// External reset: abandons any interaction and forgets the sensor state.
    pub fn reset(&mut self) {
        self.modes.reset();
        self.sensor.reset();
    }

    /// Flushes and closes the telemetry sink, if any.
    pub fn finish_telemetry(&mut self) -> anyhow::Result<Option<TelemetryStats>> {
        match self.telemetry.take() {
            Some(mut writer) => writer.finish().map(Some),
            None => Ok(None),
        }
    }

    pub fn tick(&mut self, input: &InputFrame, world: &World<'_>) -> anyhow::Result<TickOutcome> {
        if matches!(self.status, CharacterStatus::Frozen { .. }) {
            return Ok(TickOutcome::Frozen);
        }
        self.tick += 1;
        let tick = self.tick;
        match self.step(input, world) {
            Ok(()) => Ok(TickOutcome::Advanced),
            Err((phase, err)) => {
                error!(
                    target: "locomotion_core::frame",
                    tick,
                    phase = %phase,
                    error = %format!("{err:#}"),
                    "character frozen"
                );
                self.status = CharacterStatus::Frozen {
                    tick,
                    phase,
                    reason: format!("{err:#}"),
                };
                Err(err.context(format!("tick {tick} failed during {phase}")))
            }
        }
    }

    fn step(
        &mut self,
        input: &InputFrame,
        world: &World<'_>,
    ) -> Result<(), (TickPhase, anyhow::Error)> {
        let sensed = self.sense(input);
        let decision = self
            .decide(&sensed, world)
            .map_err(|err| (TickPhase::Decide, err))?;
        self.apply(&decision, &sensed);
        self.sensor.sense(
            &decision.sense.pivot,
            world.scene,
            decision.sense.size,
            self.config.sensor.smoothing,
        );
        self.feed();
        self.port
            .predict(self.predictor.as_mut())
            .map_err(|err| (TickPhase::Predict, err))?;
        let poses = self
            .read(sensed.network_control)
            .map_err(|err| (TickPhase::Read, err))?;
        self.commit(&poses);
        self.modes.observe(&self.window);
        self.record(&sensed);
        Ok(())
    }

    fn sense(&mut self, input: &InputFrame) -> Sensed {
        self.controller.update(input);
        let signals = self.controller.pool_signals();
        Sensed {
            user_control: self.controller.pool_user_control(&signals),
            network_control: self.controller.pool_network_control(&signals),
            signals,
        }
    }

    fn decide(&mut self, sensed: &Sensed, world: &World<'_>) -> anyhow::Result<Decision> {
        let [x, y, z] = self.config.sensor.size;
        let ctx = TickContext {
            controller: &self.controller,
            signals: &sensed.signals,
            window: &self.window,
            interactions: world.interactions,
            scene: world.scene,
            free_sense_size: Vec3::new(x, y, z),
        };
        self.modes.decide(&ctx)
    }

    fn apply(&mut self, decision: &Decision, sensed: &Sensed) {
        match &decision.command {
            GoalCommand::Static {
                position,
                direction,
                actions,
            } => self.blender.apply_static_goal(
                &mut self.window,
                *position,
                *direction,
                actions,
                sensed.user_control,
            ),
            GoalCommand::Dynamic {
                root,
                move_vector,
                turn,
                actions,
            } => self.blender.apply_dynamic_goal(
                &mut self.window,
                root,
                *move_vector,
                *turn,
                actions,
                sensed.user_control,
            ),
        }
    }

    /// Writes the feed stream. The order here is the predictor protocol.
    fn feed(&mut self) {
        let port = &mut self.port;
        let window = &self.window;
        let layout = window.layout();
        let root = window.pivot_root();
        port.begin();

        for bone in &self.skeleton.bones {
            port.feed_vec3(root.to_local_position(bone.position));
            port.feed_vec3(root.to_local_direction(bone.forward()));
            port.feed_vec3(root.to_local_direction(bone.up()));
            port.feed_vec3(root.to_local_direction(bone.velocity));
        }

        let last = window.root().last();
        for bone in &self.skeleton.bones {
            port.feed_vec3(last.to_local_position(bone.position));
        }

        for key in layout.keys() {
            port.feed_xz(root.to_local_position(window.root().position(key.index)));
            port.feed_xz(root.to_local_direction(window.root().direction(key.index)));
            port.feed_slice(window.style().row(key.index));
        }

        port.feed_slice(window.contact().row(window.pivot()));

        let goal = window.goal().transform(window.pivot()).grounded();
        for key in layout.keys() {
            port.feed_xz(goal.to_local_position(window.root().position(key.index)));
            port.feed_xz(goal.to_local_direction(window.root().direction(key.index)));
        }

        for key in layout.keys() {
            port.feed_vec3(root.to_local_position(window.goal().position(key.index)));
            port.feed_vec3(root.to_local_direction(window.goal().forward(key.index)));
            port.feed_slice(window.goal().actions().row(key.index));
        }

        for (reference, occupancy) in self
            .sensor
            .references()
            .iter()
            .zip(self.sensor.occupancies())
        {
            port.feed_vec3(root.to_local_position(*reference));
            port.feed(*occupancy);
        }
    }

    /// Consumes the predictor output in feed order and reconciles it with
    /// the window. Returns the new bone poses for Commit.
    fn read(&mut self, network_control: f32) -> anyhow::Result<Vec<BonePose>> {
        self.window.advance();
        let blending = &self.config.blending;
        let framerate = self.config.framerate;
        let port = &mut self.port;
        let window = &mut self.window;
        let layout = window.layout().clone();
        let pivot = window.pivot();
        let pivot_key = layout.pivot_key();
        let root = window.pivot_root();
        let mut debug = DebugPredictions::default();

        let mut poses = Vec::with_capacity(self.skeleton.len());
        for bone in &self.skeleton.bones {
            let position = root.to_world_position(port.read_vec3()?);
            let forward = root.to_world_direction(normalize_or_zero(port.read_vec3()?));
            let up = root.to_world_direction(normalize_or_zero(port.read_vec3()?));
            let velocity = root.to_world_direction(port.read_vec3()?);
            let extrapolated = bone.position + velocity / framerate;
            poses.push(BonePose {
                position: lerp_vec3(extrapolated, position, blending.pose_blend),
                forward,
                up,
                velocity,
            });
        }

        let last = window.root().last();
        for _ in &self.skeleton.bones {
            debug.inverse_pose.push(last.to_world_position(port.read_vec3()?));
        }

        for (k, key) in layout.keys().enumerate() {
            let position = root.to_world_position(port.read_xz()?);
            let direction = root.to_world_direction(normalize_or_zero(port.read_xz()?));
            let mut styles = port.read_slice(window.style().width())?;
            if k >= pivot_key {
                window.root_mut().set_position(key.index, position);
                window.root_mut().set_direction(key.index, direction);
                clamp01_all(&mut styles);
                window.style_mut().set_row(key.index, &styles);
                debug
                    .roots
                    .push(Transform::new(position, look_rotation(direction, Vec3::Y)));
            }
        }

        let mut contacts = port.read_slice(window.contact().width())?;
        clamp01_all(&mut contacts);
        window.contact_mut().set_row(pivot, &contacts);

        let goal = window.goal().transform(pivot).grounded();
        let span = (layout.future_key_count() + 1) as f32;
        for (k, key) in layout.keys().enumerate() {
            let position = goal.to_world_position(port.read_xz()?);
            let direction = goal.to_world_direction(normalize_or_zero(port.read_xz()?));
            if k > pivot_key {
                let current = window.root().transform(key.index);
                let target = window.goal().transform(key.index);
                let distance = current
                    .grounded()
                    .position
                    .distance(target.grounded().position);
                let weight = ((k - pivot_key) as f32 / span)
                    .powf(distance * distance * blending.correction_sharpness);
                window
                    .root_mut()
                    .set_position(key.index, lerp_vec3(current.position, position, weight));
                window.root_mut().set_direction(
                    key.index,
                    slerp_vec3(current.forward(), direction, weight),
                );
            }
            if k >= pivot_key {
                debug
                    .goals
                    .push(Transform::new(position, look_rotation(direction, Vec3::Y)));
            }
        }

        for (k, key) in layout.keys().enumerate() {
            let position = root.to_world_position(port.read_vec3()?);
            let direction = root.to_world_direction(normalize_or_zero(port.read_vec3()?));
            let mut actions = port.read_slice(window.goal().actions().width())?;
            clamp01_all(&mut actions);
            if k < pivot_key {
                continue;
            }
            let weight = layout.weight(key.index, blending.correction_curvature) * network_control;
            let rotation = if direction == Vec3::ZERO {
                window.goal().transform(key.index).rotation
            } else {
                look_rotation(direction, Vec3::Y)
            };
            let predicted = Transform::new(position, rotation);
            let blended = interpolate_transform(&window.goal().transform(key.index), &predicted, weight);
            window.goal_mut().set_transform(key.index, blended);
            let row = interpolate_weights(window.goal().actions().row(key.index), &actions, weight);
            window.goal_mut().actions_mut().set_row(key.index, &row);
        }

        // history is an exact shift of already dense samples, so only the
        // pivot onward is re-interpolated
        window.densify();
        port.finish()?;
        self.debug = debug;
        Ok(poses)
    }

    fn commit(&mut self, poses: &[BonePose]) {
        self.skeleton.root = self.window.pivot_root();
        for (bone, pose) in self.skeleton.bones.iter_mut().zip(poses) {
            bone.position = pose.position;
            bone.velocity = pose.velocity;
            bone.set_orientation(pose.forward, pose.up);
        }
        debug!(
            target: "locomotion_core::frame",
            tick = self.tick,
            x = self.skeleton.root.position.x,
            z = self.skeleton.root.position.z,
            signal = self.controller.active_signal().name.as_str(),
            "committed"
        );
    }

    /// One telemetry row per committed tick. A failing sink is dropped
    /// without affecting the character.
    fn record(&mut self, sensed: &Sensed) {
        let Some(writer) = self.telemetry.as_mut() else {
            return;
        };
        let pivot = self.window.pivot();
        let root = self.skeleton.root;
        let result = (|| -> anyhow::Result<()> {
            writer.feed(self.tick as f32, "Tick", 1.0)?;
            writer.feed_vec3(root.position, "RootPosition", 1.0)?;
            writer.feed_vec3(root.forward(), "RootForward", 1.0)?;
            writer.feed_slice(&sensed.signals, "Signal", 1.0)?;
            writer.feed(sensed.user_control, "UserControl", 1.0)?;
            writer.feed(sensed.network_control, "NetworkControl", 1.0)?;
            writer.feed_slice(self.window.style().row(pivot), "Style", 1.0)?;
            writer.feed_slice(self.window.contact().row(pivot), "Contact", 1.0)?;
            writer.store()
        })();
        if let Err(err) = result {
            warn!(
                target: "locomotion_core::frame",
                error = %err,
                "telemetry disabled after write failure"
            );
            self.telemetry = None;
        }
    }
}
