use clap::Parser;
use qms_event_sender::Args;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    core_config::tracing::install_color_eyre();
    core_config::tracing::init_tracing(&core_config::Environment::from_env());

    qms_event_sender::run(Args::parse()).await
}
