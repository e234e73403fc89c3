mod options_file;

use nts_core::TaskContextRegistry;
use nts_facade::tools;
use options_file::load_options;
use std::env;
use std::path::PathBuf;

/// A small, non-networked harness: it walks one task through read, edit, checkpoint, undo and
/// redo so the transactional core can be exercised end to end without a host protocol attached.
/// Wiring this façade to an actual agent transport (stdio, HTTP, whatever the embedder uses) is
/// out of scope here, same as it is for the core itself.
fn main() {
    nts_shared::logger::init_logging();

    let state_root = state_root_from_args();
    let options = load_options(state_root.clone());
    log::info!("state root: {}", options.state_root.display());

    let registry = TaskContextRegistry::new(options);
    let task_id = "demo";

    let demo_file = state_root.join("tasks").join(task_id).join("workdir").join("greeting.txt");
    if let Some(parent) = demo_file.parent() {
        std::fs::create_dir_all(parent).expect("create demo workdir");
    }
    std::fs::write(&demo_file, "hello\nworld\n").expect("seed demo file");

    let response = tools::task(&registry, task_id);
    print_response("task", &response);

    let read_response = tools::read(&registry, &demo_file, None, None);
    print_response("read", &read_response);

    let token = read_response
        .content
        .lines()
        .rev()
        .find_map(|line| line.strip_prefix("token: "))
        .expect("demo read must issue a token");

    let checkpoint_response = tools::checkpoint(&registry, "before-edit", false);
    print_response("checkpoint", &checkpoint_response);

    let edit_response = tools::edit(&registry, &demo_file, token, 2, 2, "rust");
    print_response("edit", &edit_response);

    let undo_response = tools::undo(&registry);
    print_response("undo", &undo_response);

    let redo_response = tools::redo(&registry);
    print_response("redo", &redo_response);
}

fn state_root_from_args() -> PathBuf {
    env::args().nth(1).map(PathBuf::from).unwrap_or_else(|| {
        let mut dir = env::temp_dir();
        dir.push("nts-demo");
        dir
    })
}

fn print_response(tool: &str, response: &nts_facade::ToolResponse) {
    if response.is_error {
        eprintln!("[{}] error: {}", tool, response.content);
    } else {
        println!("[{}] {}", tool, response.content);
    }
}
