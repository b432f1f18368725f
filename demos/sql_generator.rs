use std::error::Error;

use sqlgen::utils::BalancedParens;
use sqlgen::{parse_file, ExpansionStats, Generator, GrammarBuilder, Replacer};

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load the CREATE TABLE grammar and cap every unannotated production
    let productions = parse_file(concat!(env!("CARGO_MANIFEST_DIR"), "/demos/create_table.y"))?;
    let registry = GrammarBuilder::new()
        .productions(productions)
        .default_loop_bound(3)
        .exclude("MyISAM")
        .build()?;

    // Fresh identifiers per statement instead of the grammar placeholders
    let mut replacer = Replacer::new();
    replacer
        .add_sequence("table_ident", "t")
        .add_sequence("column_name", "c");

    let mut generator = Generator::with_seed(&registry, &replacer, 2024);

    println!("Generated CREATE TABLE statements:");
    let batch = generator.generate_batch("create_table_stmt", 10, 20, &BalancedParens);
    for (i, sql) in batch.valid.iter().enumerate() {
        println!("{}. {};", i + 1, sql);
    }
    for (sql, reason) in &batch.invalid {
        println!("rejected ({}): {}", reason, sql);
    }

    // Replace a production with a constant and watch where expansion struggles
    replacer.add_const("opt_table_options", "ENGINE = InnoDB");
    let mut generator = Generator::with_seed(&registry, &replacer, 7).separator(" ");
    let mut stats = ExpansionStats::new();
    for _ in 0..100 {
        generator.generate_observed("create_table_stmt", &mut stats);
    }
    println!(
        "\n100 statements entered {} productions with {} dead ends",
        stats.total_entries(),
        stats.total_dead_ends()
    );

    Ok(())
}
