use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use locomotion_core::config::ControllerConfig;
use locomotion_core::controller::{InputFrame, Key};
use locomotion_core::math::Transform;
use locomotion_core::port::{IdentityPredictor, ProtocolLayout};
use locomotion_core::sensor::{Aabb, BoxScene};
use locomotion_core::skeleton::Skeleton;
use locomotion_core::{Character, World};
use glam::Vec3;

fn character(resolution: usize) -> Character {
    let mut config = ControllerConfig {
        bones: (0..24).map(|idx| format!("bone{idx}")).collect(),
        ..ControllerConfig::default()
    };
    config.window.resolution = resolution;
    let output = ProtocolLayout::from_config(&config).output_dim();
    let skeleton = Skeleton::upright(&config.bones, Transform::IDENTITY, 1.7);
    Character::new(config, skeleton, Box::new(IdentityPredictor::new(Some(output))))
        .expect("bench character")
}

fn bench_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("character_tick");
    let scene = BoxScene::new(vec![
        Aabb::from_center_size(Vec3::new(0.0, 0.45, 2.0), Vec3::new(0.6, 0.9, 0.6)),
        Aabb::from_center_size(Vec3::new(1.5, 0.4, -1.0), Vec3::new(2.0, 0.8, 1.0)),
    ]);
    let world = World {
        scene: &scene,
        interactions: &[],
    };
    let input = InputFrame::with_keys(&[Key::W]);
    for resolution in [1usize, 5] {
        let mut character = character(resolution);
        group.bench_function(BenchmarkId::new("walk", resolution), |b| {
            b.iter(|| character.tick(&input, &world).expect("tick"));
        });
    }
    group.finish();
}

criterion_group!(tick_benches, bench_tick);
criterion_main!(tick_benches);
