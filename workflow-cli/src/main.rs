#[tokio::main]
async fn main() {
    let exit_code = workflow_cli::run().await;
    std::process::exit(exit_code);
}
