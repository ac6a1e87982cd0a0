use action_compiler::codegen::render_function;
use action_compiler::config::GeneratorConfig;
use action_compiler::expand::PatternLibrary;
use action_compiler::ir::CompiledAction;
use action_compiler::run::{RunReport, compile_source};

// =============================================================================
// Fixtures
// =============================================================================

/// Contents of `tests/fixtures/<name>`.
pub fn fixture(name: &str) -> String {
    let path = format!("{}/tests/fixtures/{}", env!("CARGO_MANIFEST_DIR"), name);
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("reading {path}: {e}"))
}

pub fn library() -> PatternLibrary {
    PatternLibrary::builtin().expect("built-in patterns load")
}

pub fn config() -> GeneratorConfig {
    GeneratorConfig::default()
}

// =============================================================================
// Compilation
// =============================================================================

/// Compile a project document with the built-in patterns and default config.
pub fn compile(source: &str) -> RunReport {
    compile_source(source, &library(), &config())
}

/// Compile and fail the test on any error, listing them all.
pub fn compile_ok(source: &str) -> RunReport {
    let report = compile(source);
    if !report.errors.is_empty() {
        let listed: Vec<String> = report.errors.iter().map(|e| e.to_string()).collect();
        panic!("unexpected compile errors:\n{}", listed.join("\n"));
    }
    report
}

pub fn action<'r>(report: &'r RunReport, name: &str) -> &'r CompiledAction {
    report
        .action(name)
        .unwrap_or_else(|| panic!("action '{name}' was not compiled"))
}

/// Rendered core function of `name`.
pub fn core_sql(report: &RunReport, name: &str) -> String {
    render_function(&action(report, name).core)
}

/// Rendered wrapper function of `name`.
pub fn wrapper_sql(report: &RunReport, name: &str) -> String {
    render_function(&action(report, name).wrapper)
}

/// Assert every fragment occurs in `sql`, printing the SQL on failure.
pub fn assert_contains_all(sql: &str, fragments: &[&str]) {
    for fragment in fragments {
        assert!(
            sql.contains(fragment),
            "expected fragment not found:\n{fragment}\n--- in ---\n{sql}"
        );
    }
}

/// Assert `block` occurs as consecutive lines of `sql`, ignoring indentation.
pub fn assert_block(sql: &str, block: &[&str]) {
    let lines: Vec<&str> = sql.lines().map(str::trim).collect();
    let found = lines.windows(block.len()).any(|window| window == block);
    assert!(
        found,
        "expected block not found:\n{}\n--- in ---\n{sql}",
        block.join("\n")
    );
}

/// Byte offset of `fragment` in `sql`, for ordering assertions.
pub fn position(sql: &str, fragment: &str) -> usize {
    sql.find(fragment)
        .unwrap_or_else(|| panic!("fragment not found:\n{fragment}\n--- in ---\n{sql}"))
}
