use crate::config::ControllerConfig;
use crate::frame::{Character, CharacterStatus, TickOutcome, World};
use crate::interaction::{ContactOracle, Mode};
use crate::math::Transform;
use crate::navigation::{GridNavMesh, WaypointPlanner};
use crate::port::SequencePredictor;
use crate::noise::{NoiseSeeds, NoiseSummary};
use crate::scenario::Scenario;
use crate::telemetry::{TelemetryStats, TelemetryWriter};
use std::path::PathBuf;
use tracing::{info, warn};

const DEFAULT_TICKS: u64 = 300;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Overrides the scenario's tick count.
    pub ticks: Option<u64>,
    /// Overrides `telemetry.path` from the configuration.
    pub telemetry: Option<PathBuf>,
}

/// Learned components handed to the character for one run.
pub struct Backends {
    pub predictor: Box<dyn SequencePredictor>,
    /// Used when `interaction.use_contact_oracle` is set.
    pub contact_oracle: Option<Box<dyn ContactOracle>>,
}

impl Backends {
    pub fn new(predictor: Box<dyn SequencePredictor>) -> Self {
        Self {
            predictor,
            contact_oracle: None,
        }
    }

    pub fn with_contact_oracle(mut self, oracle: Box<dyn ContactOracle>) -> Self {
        self.contact_oracle = Some(oracle);
        self
    }
}

pub struct RunOutcome {
    pub ticks: u64,
    pub status: CharacterStatus,
    pub final_root: Transform,
    pub final_mode: Mode,
    pub mode_changes: usize,
    pub telemetry: Option<TelemetryStats>,
    pub noise: NoiseSummary,
}

/// Drives one character through `scenario`. `make_backends` receives the
/// run's noise seeds so stochastic backends draw reproducible latents.
pub fn run_scenario<F>(
    config: ControllerConfig,
    scenario: &Scenario,
    options: &RunOptions,
    make_backends: F,
) -> anyhow::Result<RunOutcome>
where
    F: FnOnce(&ControllerConfig, &NoiseSeeds) -> anyhow::Result<Backends>,
{
    config.validate()?;
    scenario.validate()?;
    let seeds = NoiseSeeds::new(&config.noise);
    let noise = seeds.summary();
    info!(
        target: "locomotion_core::noise",
        mode = ?noise.mode,
        seed = ?noise.seed,
        "latent noise seeded"
    );
    let backends = make_backends(&config, &seeds)?;

    let scene = scenario.scene();
    let skeleton = scenario.skeleton(&config.bones);
    let mut character = Character::new(config.clone(), skeleton, backends.predictor)?;
    match backends.contact_oracle {
        Some(oracle) => character = character.with_contact_oracle(oracle),
        None if config.interaction.use_contact_oracle => warn!(
            target: "locomotion_core::runner",
            "contact oracle enabled but no backend supplied; using named contacts"
        ),
        None => {}
    }
    if let Some(bounds) = &scenario.navigation {
        let mesh = GridNavMesh::new(bounds, &scene.boxes, config.navigation.cell_size);
        character = character.with_path_oracle(Box::new(WaypointPlanner::new(
            mesh,
            config.navigation.clone(),
        )));
    }
    let telemetry_path = options.telemetry.clone().or(config.telemetry.path.clone());
    if let Some(path) = telemetry_path {
        character = character.with_telemetry(TelemetryWriter::create(&path)?);
    }

    let ticks = options.ticks.or(scenario.ticks).unwrap_or(DEFAULT_TICKS);
    info!(
        target: "locomotion_core::runner",
        ticks,
        interactions = scenario.interactions.len(),
        boxes = scenario.boxes.len(),
        path_planning = scenario.navigation.is_some(),
        "starting scenario"
    );
    let world = World {
        scene: &scene,
        interactions: &scenario.interactions,
    };
    let mut mode = character.mode();
    let mut mode_changes = 0;
    for tick in 1..=ticks {
        match character.tick(&scenario.input_at(tick), &world) {
            Ok(TickOutcome::Advanced) => {}
            Ok(TickOutcome::Frozen) => break,
            Err(err) => {
                warn!(
                    target: "locomotion_core::runner",
                    error = %format!("{err:#}"),
                    "character stopped"
                );
                break;
            }
        }
        if character.mode() != mode {
            info!(
                target: "locomotion_core::runner",
                tick,
                from = ?mode,
                to = ?character.mode(),
                "mode changed"
            );
            mode = character.mode();
            mode_changes += 1;
        }
    }

    let telemetry = character.finish_telemetry()?;
    let final_root = character.skeleton().root;
    info!(
        target: "locomotion_core::runner",
        ticks = character.ticks(),
        x = final_root.position.x,
        z = final_root.position.z,
        mode = ?character.mode(),
        mode_changes,
        status = ?character.status(),
        "scenario finished"
    );
    Ok(RunOutcome {
        ticks: character.ticks(),
        status: character.status().clone(),
        final_root,
        final_mode: character.mode(),
        mode_changes,
        telemetry,
        noise,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::Key;
    use crate::interaction::ContactPose;
    use crate::interaction::Interaction;
    use crate::navigation::NavigationBounds;
    use crate::port::{IdentityPredictor, ProtocolLayout};
    use crate::scenario::ScriptedInput;
    use crate::sensor::{Aabb, CollisionScene};
    use glam::Vec3;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn sit_scenario() -> Scenario {
        Scenario {
            boxes: vec![Aabb::from_center_size(Vec3::new(0.0, 0.45, 3.0), Vec3::new(0.6, 0.9, 0.6))],
            interactions: vec![Interaction {
                id: "chair".into(),
                center: Transform::from_position_direction(Vec3::new(0.0, 0.45, 3.0), -Vec3::Z),
                extents: Vec3::splat(1.5),
                contacts: vec![ContactPose {
                    name: "Hips".into(),
                    transform: Transform::from_position_direction(
                        Vec3::new(0.0, 0.5, 3.0),
                        -Vec3::Z,
                    ),
                }],
            }],
            navigation: Some(NavigationBounds::default()),
            inputs: vec![
                ScriptedInput {
                    from_tick: 1,
                    keys: vec![Key::C],
                    projection: None,
                },
                ScriptedInput {
                    from_tick: 10,
                    keys: vec![],
                    projection: None,
                },
            ],
            ticks: Some(20),
            ..Scenario::default()
        }
    }

    fn identity(
        config: &ControllerConfig,
        _seeds: &NoiseSeeds,
    ) -> anyhow::Result<Backends> {
        let output = ProtocolLayout::from_config(config).output_dim();
        Ok(Backends::new(Box::new(IdentityPredictor::new(Some(output)))))
    }

    struct CountingContact {
        pose: Transform,
        calls: Arc<AtomicUsize>,
    }

    impl ContactOracle for CountingContact {
        fn predict_contact(
            &mut self,
            _interaction: &Interaction,
            _scene: &dyn CollisionScene,
        ) -> anyhow::Result<Transform> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.pose)
        }
    }

    #[test]
    fn supplied_contact_oracle_picks_the_target() {
        let mut config = ControllerConfig {
            bones: vec!["Hips".into(), "Head".into()],
            ..ControllerConfig::default()
        };
        config.interaction.use_contact_oracle = true;
        let scenario = Scenario {
            navigation: None,
            ..sit_scenario()
        };
        let calls = Arc::new(AtomicUsize::new(0));
        let oracle_calls = Arc::clone(&calls);
        let outcome = run_scenario(config, &scenario, &RunOptions::default(), |config, seeds| {
            let oracle = CountingContact {
                pose: Transform::from_position_direction(Vec3::new(0.3, 0.5, 2.7), -Vec3::Z),
                calls: oracle_calls,
            };
            Ok(identity(config, seeds)?.with_contact_oracle(Box::new(oracle)))
        })
        .expect("run");
        assert_eq!(outcome.status, CharacterStatus::Active);
        assert_eq!(outcome.mode_changes, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn scripted_sit_enters_and_leaves_interaction() {
        let config = ControllerConfig {
            bones: vec!["Hips".into(), "Head".into()],
            ..ControllerConfig::default()
        };
        let outcome =
            run_scenario(config, &sit_scenario(), &RunOptions::default(), identity).expect("run");
        assert_eq!(outcome.ticks, 20);
        assert_eq!(outcome.status, CharacterStatus::Active);
        assert_eq!(outcome.final_mode, Mode::Free);
        assert_eq!(outcome.mode_changes, 2);
        assert_eq!(outcome.noise.seed, Some(7));
        assert!(outcome.telemetry.is_none());
    }

    #[test]
    fn telemetry_override_records_every_tick() {
        let dir = tempfile::tempdir().unwrap();
        let options = RunOptions {
            ticks: Some(8),
            telemetry: Some(dir.path().join("run.txt")),
        };
        let outcome = run_scenario(ControllerConfig::default(), &Scenario::default(), &options, identity)
            .expect("run");
        assert_eq!(outcome.ticks, 8);
        assert_eq!(outcome.telemetry.map(|stats| stats.rows_written), Some(8));
    }

    #[test]
    fn invalid_config_fails_before_running() {
        let mut config = ControllerConfig::default();
        config.framerate = 0.0;
        assert!(run_scenario(config, &Scenario::default(), &RunOptions::default(), identity).is_err());
    }
}
