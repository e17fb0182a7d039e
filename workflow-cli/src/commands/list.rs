use workflow_core::config::EngineConfig;

use super::EXIT_SUCCESS;

pub fn run(config: &EngineConfig) -> i32 {
    let mut names = workflow_core::parser::list_workflows(config);
    names.sort();
    if names.is_empty() {
        println!("no workflows found under {}", config.workflows_dir.display());
        return EXIT_SUCCESS;
    }
    for name in names {
        println!("{name}");
    }
    EXIT_SUCCESS
}
