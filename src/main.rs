/// Entry point of the gadget resolver service.
///
/// Starts an in-memory container resolver, optionally preloaded from the file
/// named by `GADGET_CONTAINERS_FILE`, and logs container lifecycle events and
/// published tracer events until interrupted.
///
/// # Examples
///
/// ```bash
/// RUST_LOG=info GADGET_CONTAINERS_FILE=containers.json cargo run
/// ```
#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    gadget_resolver::run().await
}
