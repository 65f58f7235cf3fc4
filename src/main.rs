use actuator_remote::domain::joystick::JoystickGeometry;
use actuator_remote::domain::models::{AppEvent, DeviceId, EngineCommand};
use actuator_remote::domain::settings::{Settings, SettingsService};
use actuator_remote::infrastructure::bluetooth::connection::ConnectionConfig;
use actuator_remote::infrastructure::bluetooth::simulated::{
    SimulatedPeripheral, SimulatedTransport,
};
use actuator_remote::infrastructure::bluetooth::transport::{Transport, TransportEvent};
use actuator_remote::infrastructure::bluetooth::ControlService;
use actuator_remote::infrastructure::logging;
use actuator_remote::presentation::console;
use tokio::sync::mpsc;
use tracing::{info, warn};

fn load_settings() -> Settings {
    match SettingsService::new() {
        Ok(service) => service.get().clone(),
        Err(e) => {
            eprintln!("Failed to load settings, using defaults: {}", e);
            Settings::default()
        }
    }
}

fn main() -> anyhow::Result<()> {
    let settings = load_settings();

    let _logging_guard = logging::init_logger(&settings.log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();

    info!("Starting Actuator Remote");

    let config = ConnectionConfig::from_settings(&settings)?;
    let geometry = JoystickGeometry::new(settings.joystick_radius, settings.invert_y);

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    rt.block_on(launch(settings, config, geometry));

    info!("Actuator Remote stopped");
    Ok(())
}

#[cfg(windows)]
async fn launch(settings: Settings, config: ConnectionConfig, geometry: JoystickGeometry) {
    use actuator_remote::infrastructure::bluetooth::winrt::WinRtTransport;

    let (transport_tx, transport_rx) = mpsc::unbounded_channel();
    if settings.use_simulator {
        let transport = simulator(&settings, &config, transport_tx);
        run_service(transport, config, transport_rx, geometry).await;
    } else {
        let transport = WinRtTransport::open(transport_tx).await;
        run_service(transport, config, transport_rx, geometry).await;
    }
}

#[cfg(not(windows))]
async fn launch(settings: Settings, config: ConnectionConfig, geometry: JoystickGeometry) {
    let (transport_tx, transport_rx) = mpsc::unbounded_channel();
    let transport = simulator(&settings, &config, transport_tx);
    run_service(transport, config, transport_rx, geometry).await;
}

/// One named peripheral plus an anonymous neighbour that scans must hide
fn simulator(
    settings: &Settings,
    config: &ConnectionConfig,
    events: mpsc::UnboundedSender<TransportEvent>,
) -> SimulatedTransport {
    warn!("Using the simulated peripheral");
    let peripherals = vec![
        SimulatedPeripheral::new(
            DeviceId(0x00A1_B2C3_D4E5),
            &settings.simulator_device_name,
            settings.protocol_generation,
        ),
        SimulatedPeripheral {
            id: DeviceId(0x00F0_0D00_0001),
            name: None,
            signal_strength: -80,
            generation: settings.protocol_generation,
        },
    ];
    let (transport, _handle) = SimulatedTransport::new(events, config.ids.clone(), peripherals);
    transport
}

async fn run_service<T: Transport + 'static>(
    transport: T,
    config: ConnectionConfig,
    transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
    geometry: JoystickGeometry,
) {
    let (command_tx, command_rx) = mpsc::unbounded_channel::<EngineCommand>();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<AppEvent>();

    let service = ControlService::new(transport, config, command_rx, transport_rx, event_tx);
    let engine = tokio::spawn(service.run());

    // Stdin blocks, so it gets a thread of its own
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        console::read_commands(stdin.lock(), geometry, command_tx);
    });

    // The channel closes once the service has torn down and dropped its sender
    while let Some(event) = event_rx.recv().await {
        println!("{}", console::render(&event));
    }

    if let Err(e) = engine.await {
        warn!("Control service ended abnormally: {}", e);
    }
}
