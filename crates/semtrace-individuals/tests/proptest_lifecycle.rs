//! Property tests for the individual lifecycle.
//!
//! Random operation sequences are applied to a manager backed by a small
//! scene; after every step the readiness invariants must hold.

use proptest::prelude::*;
use rand::SeedableRng;
use rand_pcg::Pcg64;
use semtrace_individuals::prelude::*;

/// Operations applied to the manager. Indices are taken modulo the number
/// of spawned individuals.
#[derive(Debug, Clone)]
enum LifecycleOp {
    Init(usize, bool),
    Load(usize, bool, bool),
    SetId(usize, Option<u8>),
    SetClass(usize, Option<u8>),
    Export(usize, bool),
    Import(usize, bool),
    Despawn(usize),
    ProcessReloads,
    GenerateMask(usize),
    ToggleMask(usize),
}

fn lifecycle_op_strategy() -> impl Strategy<Value = LifecycleOp> {
    prop_oneof![
        (0..16usize, any::<bool>()).prop_map(|(i, r)| LifecycleOp::Init(i, r)),
        (0..16usize, any::<bool>(), any::<bool>())
            .prop_map(|(i, r, t)| LifecycleOp::Load(i, r, t)),
        (0..16usize, proptest::option::of(0..4u8)).prop_map(|(i, v)| LifecycleOp::SetId(i, v)),
        (0..16usize, proptest::option::of(0..4u8)).prop_map(|(i, v)| LifecycleOp::SetClass(i, v)),
        (0..16usize, any::<bool>()).prop_map(|(i, o)| LifecycleOp::Export(i, o)),
        (0..16usize, any::<bool>()).prop_map(|(i, o)| LifecycleOp::Import(i, o)),
        (0..16usize).prop_map(LifecycleOp::Despawn),
        Just(LifecycleOp::ProcessReloads),
        (0..16usize).prop_map(LifecycleOp::GenerateMask),
        (0..16usize).prop_map(LifecycleOp::ToggleMask),
    ]
}

/// A scene with a tagged cup, an untagged table, a mesh-less ghost, a gaze
/// target, and a small skeleton.
fn build_scene() -> (SceneHost, IndividualManager, Vec<IndividualId>) {
    let mut host = SceneHost::new();
    let owners = [
        (
            host.add(
                HostEntity::named("Cup")
                    .with_mesh("SM_Cup")
                    .with_tag("SemLog;Id,cup;Class,Cup;"),
            ),
            IndividualType::Visible,
        ),
        (
            host.add(HostEntity::named("Table").with_mesh("SM_Table")),
            IndividualType::Visible,
        ),
        (host.add(HostEntity::named("Ghost")), IndividualType::Visible),
        (host.add(HostEntity::named("Gaze")), IndividualType::Base),
        (
            host.add(
                HostEntity::named("Arm").with_skeleton(Skeleton::new(vec![
                    BoneInfo::new("upper", None).with_material(0),
                    BoneInfo::new("lower", Some(0)),
                ])),
            ),
            IndividualType::Skeletal,
        ),
    ];
    let mut manager = IndividualManager::with_seed(42);
    let ids = owners
        .iter()
        .map(|(owner, ty)| manager.spawn(*owner, *ty).unwrap())
        .collect();
    (host, manager, ids)
}

fn value(v: Option<u8>) -> String {
    v.map(|n| format!("v{n}")).unwrap_or_default()
}

fn assert_invariants(manager: &IndividualManager) {
    for (id, individual) in manager.iter() {
        if individual.is_loaded() {
            assert!(individual.is_init(), "{id}: loaded implies init");
            assert!(individual.has_id(), "{id}: loaded implies id");
            assert!(individual.has_class(), "{id}: loaded implies class");
            if individual.kind().is_perceivable() {
                assert!(individual.visual_mask().is_some(), "{id}: loaded perceivable has a mask");
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    #[test]
    fn random_ops_preserve_readiness_invariants(
        ops in prop::collection::vec(lifecycle_op_strategy(), 1..60)
    ) {
        let (mut host, mut manager, mut ids) = build_scene();

        for op in ops {
            if ids.is_empty() {
                break;
            }
            let pick = |i: usize| ids[i % ids.len()];
            match op {
                LifecycleOp::Init(i, reset) => { let _ = manager.init(&host, pick(i), reset); }
                LifecycleOp::Load(i, reset, import) => {
                    let _ = manager.load(&host, pick(i), reset, import);
                }
                LifecycleOp::SetId(i, v) => { let _ = manager.set_id(pick(i), &value(v)); }
                LifecycleOp::SetClass(i, v) => { let _ = manager.set_class(pick(i), &value(v)); }
                LifecycleOp::Export(i, overwrite) => {
                    let _ = manager.export_to_store(&mut host, pick(i), overwrite);
                }
                LifecycleOp::Import(i, overwrite) => {
                    let _ = manager.import_from_store(&host, pick(i), overwrite);
                }
                LifecycleOp::Despawn(i) => {
                    let id = pick(i);
                    manager.despawn(id).unwrap();
                    ids.retain(|other| *other != id);
                    prop_assert!(!manager.is_alive(id));
                }
                LifecycleOp::ProcessReloads => { manager.process_pending_reloads(&host); }
                LifecycleOp::GenerateMask(i) => { let _ = manager.generate_unique_visual_mask(pick(i), true); }
                LifecycleOp::ToggleMask(i) => { let _ = manager.toggle_mask_materials(pick(i)); }
            }
            assert_invariants(&manager);
        }
    }

    #[test]
    fn init_twice_equals_init_once(target in 0..5usize) {
        let (host, mut once, ids) = build_scene();
        let (_, mut twice, _) = build_scene();
        let id = ids[target];

        let first = once.init(&host, id, false).is_ok();
        let a = twice.init(&host, id, false).is_ok();
        let b = twice.init(&host, id, false).is_ok();

        prop_assert_eq!(first, a);
        prop_assert_eq!(a, b);
        prop_assert_eq!(once.individual(id).cloned(), twice.individual(id).cloned());
        prop_assert_eq!(once.len(), twice.len());
    }

    #[test]
    fn reset_always_passes_through_uninitialized(target in 0..5usize, load_first in any::<bool>()) {
        let (host, mut manager, ids) = build_scene();
        let id = ids[target];
        if load_first {
            let _ = manager.load(&host, id, false, true);
        } else {
            let _ = manager.init(&host, id, false);
        }
        let rx = manager.subscribe();
        let was_init = manager.individual(id).unwrap().is_init();

        let result = manager.init(&host, id, true);

        let init_changes: Vec<bool> = rx
            .try_iter()
            .filter(|n| n.individual == id)
            .filter_map(|n| match n.change { Change::Init(v) => Some(v), _ => None })
            .collect();
        let individual = manager.individual(id).unwrap();
        prop_assert!(!individual.is_loaded());
        prop_assert_eq!(individual.is_init(), result.is_ok());
        if was_init {
            prop_assert_eq!(init_changes.first(), Some(&false));
        }
    }

    #[test]
    fn generated_masks_keep_min_distance(seed in any::<u64>(), count in 1..40usize, min in 1..60u32) {
        let generator = MaskGenerator::new(min, 100);
        let mut rng = Pcg64::seed_from_u64(seed);
        let mut consumed = Vec::new();
        for _ in 0..count {
            let before = consumed.clone();
            if generator.generate_unique(&mut rng, &mut consumed).is_err() {
                prop_assert_eq!(&consumed, &before);
            }
        }
        for (i, a) in consumed.iter().enumerate() {
            for b in &consumed[i + 1..] {
                prop_assert!(a.manhattan_distance(*b) >= min);
            }
        }
    }
}

#[test]
fn export_then_load_roundtrip_for_every_perceivable() {
    let (mut host, mut manager, ids) = build_scene();
    for id in &ids {
        let _ = manager.assign_defaults(&host, *id, false);
        let _ = manager.load(&host, *id, false, false);
        let _ = manager.export_to_store(&mut host, *id, true);
    }

    let mut fresh = IndividualManager::with_seed(1);
    for id in &ids {
        let original = manager.individual(*id).unwrap();
        if !original.is_loaded() {
            continue;
        }
        let copy = fresh.spawn(original.owner(), original.individual_type()).unwrap();
        fresh.load(&host, copy, false, true).unwrap();
        let copy = fresh.individual(copy).unwrap();
        assert_eq!(copy.id(), original.id());
        assert_eq!(copy.class(), original.class());
        assert_eq!(copy.visual_mask(), original.visual_mask());
    }
}
