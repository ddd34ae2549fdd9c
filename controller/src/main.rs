mod dispatcher;
mod handler;
mod host;
mod scheduler;
mod tracker;
mod transport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
