use anyhow::{Context, bail};
use chainsaw_framework::{
    ChainsawConfig, ConnectionConfig, Credentials, DetailLevel, EventFormatter, RingBufferSink,
    Shutdown,
};
use chainsaw_vfs::VfsManager;
use chainsaw_zeroconf::{
    CredentialProvider, CredentialResponder, MdnsTransport, ReceiverRegistry, RegistryEvent,
    ServiceDiscovery,
};
use clap::Parser;
use ringbuf::traits::Consumer;
use simplelog::{ColorChoice, LevelFilter, TermLogger, TerminalMode, WriteLogger};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

const DRAIN_INTERVAL: Duration = Duration::from_millis(100);
const AD_HOC_RECEIVER: &str = "command-line";

#[derive(Parser)]
#[command(name = "chainsaw", about = "Tail local, remote and advertised log files")]
struct Cli {
    /// Configuration file (default: ~/.config/chainsaw/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Tail this file or URI in addition to the configured receivers
    #[arg(long, value_name = "URI")]
    file: Option<String>,

    /// Log format template for --file, e.g. "TIMESTAMP LEVEL [THREAD] LOGGER - MESSAGE"
    #[arg(long, value_name = "TEMPLATE")]
    format: Option<String>,

    /// Timestamp pattern for --file, or RELATIVETIME
    #[arg(long, value_name = "PATTERN")]
    timestamp_format: Option<String>,

    /// Read every receiver once and exit instead of tailing
    #[arg(long)]
    once: bool,

    /// Do not browse for advertised appenders
    #[arg(long)]
    no_discovery: bool,

    /// Connect discovered services with this instance name automatically
    #[arg(long, value_name = "NAME")]
    auto_connect: Vec<String>,

    /// Columns to print, 0 (message only) to 4 (time, level, logger, thread)
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=4))]
    detail: Option<DetailLevel>,

    /// More diagnostics on stderr (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Write debug diagnostics to this file instead of stderr
    #[arg(long, value_name = "PATH")]
    debug_log: Option<PathBuf>,
}

fn setup_logger(cli: &Cli) -> anyhow::Result<()> {
    let config = simplelog::ConfigBuilder::new()
        .set_target_level(LevelFilter::Off)
        .build();

    if let Some(path) = &cli.debug_log {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("cannot open debug log {}", path.display()))?;
        WriteLogger::init(LevelFilter::Debug, config, file)?;
        log::info!("chainsaw debug log started");
    } else {
        let level = match cli.verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            _ => LevelFilter::Debug,
        };
        TermLogger::init(level, config, TerminalMode::Stderr, ColorChoice::Auto)?;
    }
    Ok(())
}

/// prompts on the terminal; one prompt at a time
struct TerminalCredentialProvider {
    prompt: Mutex<()>,
}

impl TerminalCredentialProvider {
    fn new() -> Self {
        Self {
            prompt: Mutex::new(()),
        }
    }

    fn read_line(label: &str) -> io::Result<String> {
        let mut stderr = io::stderr();
        write!(stderr, "{}: ", label)?;
        stderr.flush()?;
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

impl CredentialProvider for TerminalCredentialProvider {
    fn request_credentials(&self, redacted_uri: &str, responder: CredentialResponder) {
        let _prompt = self.prompt.lock().unwrap_or_else(PoisonError::into_inner);
        eprintln!("Credentials required for {} (empty user name to skip)", redacted_uri);

        let answer = Self::read_line("user").and_then(|user| {
            if user.is_empty() {
                return Ok(None);
            }
            let secret = Self::read_line("password")?;
            Ok(Some(Credentials::new(user, secret)))
        });

        match answer {
            Ok(Some(credentials)) => responder.provide(credentials),
            Ok(None) => responder.cancel(),
            Err(e) => {
                log::warn!("Cannot read credentials: {}", e);
                responder.cancel();
            }
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logger(&cli)?;

    let config = ChainsawConfig::load(cli.config.as_deref()).context("cannot load configuration")?;
    let detail = cli.detail.unwrap_or(config.sink.detail_level);
    let tailing = !cli.once;

    let (sink, mut consumer) = RingBufferSink::new(config.sink.ring_buffer_size);
    let sink = Arc::new(sink);
    let vfs = Arc::new(VfsManager::with_defaults());
    log::debug!("Registered file systems: {:?}", vfs.schemes());

    let registry = ReceiverRegistry::builder(sink.clone(), vfs)
        .credential_provider(Arc::new(TerminalCredentialProvider::new()))
        .timing(config.timing.clone())
        .auto_connect(config.discovery.auto_connect.iter().cloned())
        .auto_connect(cli.auto_connect.iter().cloned())
        .build();
    let registry_events = registry.subscribe();

    for receiver in &config.receivers {
        let connection = receiver.connection.clone().with_tailing(receiver.connection.tailing && tailing);
        registry
            .connect_manual(receiver.name.as_str(), connection)
            .with_context(|| format!("cannot start receiver '{}'", receiver.name))?;
    }

    if let Some(uri) = &cli.file {
        let mut connection = ConnectionConfig::new(
            uri.as_str(),
            cli.format.as_deref().unwrap_or(chainsaw_framework::config::DEFAULT_LOG_FORMAT),
        )
        .with_tailing(tailing);
        if let Some(pattern) = &cli.timestamp_format {
            connection = connection.with_timestamp_format(pattern.as_str());
        }
        connection.prompt_for_user_info = true;
        registry
            .connect_manual(AD_HOC_RECEIVER, connection)
            .with_context(|| format!("cannot tail {}", chainsaw_vfs::redact(uri)))?;
    }

    let discovery_enabled = config.discovery.enabled && !cli.no_discovery && !cli.once;
    let discovery = if discovery_enabled {
        let transport = Arc::new(MdnsTransport::new().context("cannot start mDNS")?);
        let discovery = ServiceDiscovery::start(transport).context("cannot browse for appenders")?;
        discovery.subscribe(Arc::new(registry.clone()));
        Some(discovery)
    } else {
        None
    };

    if registry.is_empty() && discovery.is_none() {
        bail!("nothing to do: no receivers configured, no --file given and discovery is off");
    }

    let shutdown = Shutdown::new();
    let handler_shutdown = shutdown.clone();
    ctrlc::set_handler(move || handler_shutdown.close()).context("cannot install Ctrl-C handler")?;

    let formatter = EventFormatter::new();
    let stdout = io::stdout();
    loop {
        let stopping = shutdown.wait_timeout(DRAIN_INTERVAL);

        let mut out = stdout.lock();
        while let Some(event) = consumer.try_pop() {
            writeln!(out, "{}", formatter.format_preview(&event, detail))?;
            for frame in &event.throwable {
                writeln!(out, "{}", frame)?;
            }
        }
        out.flush()?;
        drop(out);

        while let Ok(event) = registry_events.try_recv() {
            match event {
                RegistryEvent::Connected(descriptor) => log::info!("Receiving from {}", descriptor),
                RegistryEvent::Disconnected(descriptor) => log::info!("Stopped receiving from {}", descriptor),
            }
        }

        if stopping || (cli.once && registry.is_empty()) {
            break;
        }
    }

    if let Some(discovery) = discovery {
        discovery.shutdown();
    }
    for connection in registry.connections() {
        log::debug!(
            "Closing {} ({:?} since {})",
            connection.descriptor,
            connection.status,
            connection.started_at.format("%H:%M:%S")
        );
    }
    registry.shutdown();

    // whatever arrived while closing
    let mut out = stdout.lock();
    while let Some(event) = consumer.try_pop() {
        writeln!(out, "{}", formatter.format_preview(&event, detail))?;
    }
    if sink.dropped() > 0 {
        log::warn!("{} events were dropped because the buffer was full", sink.dropped());
    }
    Ok(())
}
