use std::collections::{BTreeSet, HashSet};

use nick_gen_core::model::filter::StyleFilterConfig;
use nick_gen_core::model::tags::{TagPolicy, check_pair_compatibility};
use nick_gen_core::model::word_root::{RootMap, WordRoot};
use nick_gen_core::{NicknameGenerator, StyleRules};
use rand::SeedableRng;
use rand::rngs::StdRng;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    // Word roots grouped by category, some of them tagged
    let mut roots = RootMap::new();
    roots.insert(
        "意象".into(),
        vec![
            WordRoot::new("云").with_tags(["冷色调"]),
            WordRoot::new("霜").with_tags(["冷色调"]),
            WordRoot::new("月"),
            WordRoot::new("阳").with_tags(["暖色调"]),
        ],
    );
    roots.insert(
        "建筑".into(),
        vec![
            WordRoot::new("阁"),
            WordRoot::new("轩"),
            WordRoot::new("雪庐").with_tags(["冷色调"]),
            WordRoot::new("火台").with_tags(["暖色调"]),
        ],
    );

    // Templates reference categories; '{意象:冷色调}' only uses roots tagged 冷色调.
    // '{朝代}' does not exist: that template yields nothing, the others are unaffected
    let mut rules = StyleRules::new(
        "古风",
        vec!["{意象}{建筑}".into(), "{意象:冷色调}{意象}".into(), "{朝代}{建筑}".into()],
    );

    // Names must have 2 to 3 characters, no adjacent repeated character
    // and must not contain '火台'
    rules.filter = StyleFilterConfig {
        forbid_duplicate_chars: true,
        forbidden_combinations: vec![vec!["火".into(), "台".into()]],
        length_min: 2,
        length_max: 3,
    };

    // Cold and warm tags cannot be combined in a single name
    let conflicts = vec![vec!["冷色调".to_string(), "暖色调".to_string()]];
    rules.tags = TagPolicy::from_config(vec!["冷色调".into(), "暖色调".into()], &conflicts);

    let generator = NicknameGenerator::new();

    // Theoretical size of each template before filtering
    for (template, count) in generator.estimate_combinations(&rules, &roots) {
        println!("{template}: {count} combinations");
    }

    // Tag compatibility can be checked outside generation too
    let cold: BTreeSet<String> = ["冷色调".to_string()].into();
    let warm: BTreeSet<String> = ["暖色调".to_string()].into();
    println!("冷色调 + 冷色调 compatible: {}", check_pair_compatibility(&cold, &cold, &rules.tags.conflicts));
    println!("冷色调 + 暖色调 compatible: {}", check_pair_compatibility(&cold, &warm, &rules.tags.conflicts));

    // A seeded random source makes the sample reproducible
    let mut rng = StdRng::seed_from_u64(42);
    let mut known = HashSet::new();

    for round in 1..=3 {
        let generation = generator.run(&rules, &roots, 5, &known, &mut rng);
        println!(
            "Round {round}: {} candidates, {} rejected, {} returned",
            generation.stats.candidates,
            generation.stats.filter.rejected(),
            generation.stats.returned
        );
        for name in &generation.names {
            println!("  {name}");
        }

        // Names already produced are never returned again
        known.extend(generation.names);
    }

    Ok(())
}
