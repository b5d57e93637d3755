use env_logger::Env;

use jamstikctl::{
    error::AppError,
    orchestrator::Orchestrator,
    settings::Settings,
    transport::{Transport, attach_peer, jack::JackTransport},
    user_session,
};

async fn run() -> Result<(), AppError> {
    let settings = Settings::load()?;

    // Host transport
    let (mut transport, mut endpoints) = JackTransport::open(&settings)?;
    if !attach_peer(&transport) {
        log::info!("Waiting for the device to be connected");
    }

    // Keyboard; the terminal is restored when run() returns
    let _terminal = user_session::RawTerminal::stdin();
    let (mut command_rx, _input_handle) = user_session::start();

    let mut orchestrator = Orchestrator::new(settings.parameters.clone());
    let result = orchestrator.run(&mut endpoints, &mut command_rx).await;
    let closed = transport.shutdown();
    result?;
    return closed;
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    log::info!("Jamstik controller started");

    let code = match run().await {
        Ok(()) => 0,
        Err(e) => {
            log::error!("{}", e);
            1
        }
    };
    log::info!("Jamstik controller stopped");
    // stdin is read on a blocking thread that never returns by itself
    std::process::exit(code);
}
