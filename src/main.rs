//! hwkit CLI entry point.
//!
//! Each subcommand is one example tool: it validates its arguments,
//! installs the termination handlers, requests a single peripheral handle,
//! runs its loop and releases the handle on every exit path.
//!
//! ```bash
//! hwkit can-send -i can0 -b 500000 -n 100 -t 10 -r -p
//! hwkit can-recv -i can0 -b 500000 -f 023:fff,006:00f -p -c
//! hwkit gpio user_button user_led
//! hwkit watchdog /dev/watchdog0 10 60
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant};

use hwkit::core::config::{CanDefaults, EXAMPLE_SETTINGS};
use hwkit::core::logging;
use hwkit::prelude::*;
use hwkit::protocols::can::{
    self, CanHandle, CanInterfaceConfig, FrameFlags, ReceivedFrame, RetryPolicy, SendJob,
    SocketCanDriver, SocketCanTransport, MAX_RECEPTION_BUFFER,
};
use hwkit::protocols::gpio::{GpioHandle, GpioLine};
use hwkit::protocols::watchdog::{self, WatchdogHandle};

/// Pause after the last frame so the controller can drain its queue.
const SEND_LINGER: Duration = Duration::from_secs(1);

/// Period of the "waiting" messages while idle.
const HEARTBEAT: Duration = Duration::from_secs(5);

/// Watchdog refresh and countdown step.
const WATCHDOG_TICK: Duration = Duration::from_secs(1);

/// Frames buffered between the receive task and the printer.
const RX_CHANNEL_CAPACITY: usize = 256;

/// Peripheral example tools for embedded Linux
#[derive(Parser, Debug)]
#[command(name = "hwkit", version, about, long_about = None)]
struct Cli {
    /// Settings file (default: $HWKIT_CONFIG, then /etc/hwkit.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send CAN frames
    CanSend(CanSendArgs),

    /// Receive and print CAN frames
    CanRecv(CanRecvArgs),

    /// Toggle an LED from a push button
    Gpio(GpioArgs),

    /// Refresh a hardware watchdog, then let it expire
    Watchdog(WatchdogArgs),

    /// Print an example settings file
    ExampleConfig,
}

#[derive(Args, Debug)]
struct CanSendArgs {
    /// CAN interface (number, alias or name)
    #[arg(short = 'i', long = "iface")]
    iface: String,

    /// Bitrate (Hz)
    #[arg(short = 'b', long)]
    bitrate: Option<u32>,

    /// Number of frames to send; 0 keeps sending until interrupted
    #[arg(
        short = 'n',
        long = "count",
        default_value_t = 1,
        long_help = "Number of frames to send. 0 keeps sending until SIGINT, SIGTERM or \
                     SIGHUP; a failed frame ends the run either way."
    )]
    count: u64,

    /// Delay between frames (ms)
    #[arg(short = 't', long = "delay", default_value_t = 1)]
    delay_ms: u64,

    /// Frame id (hex)
    #[arg(short = 'I', long = "id", default_value = "123", value_parser = parse_hex_id)]
    id: u32,

    /// Payload length
    #[arg(short = 'l', long = "len", default_value_t = 8)]
    len: u8,

    /// Use a random standard id for each frame
    #[arg(short = 'r', long)]
    random_id: bool,

    /// Use a random payload length for each frame
    #[arg(short = 'p', long)]
    random_len: bool,

    /// Use the extended (29-bit) frame format
    #[arg(short = 'e', long)]
    extended: bool,

    /// Send remote transmission requests
    #[arg(short = 'R', long)]
    rtr: bool,

    /// Send CAN FD frames
    #[arg(long)]
    fd: bool,

    /// Transmit attempts per frame
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    retries: Option<u32>,
}

impl CanSendArgs {
    fn flags(&self) -> FrameFlags {
        let mut flags = FrameFlags::empty();
        flags.set(FrameFlags::RANDOM_ID, self.random_id);
        flags.set(FrameFlags::RANDOM_DLC, self.random_len);
        flags.set(FrameFlags::EXTENDED_ID, self.extended);
        flags.set(FrameFlags::RTR, self.rtr);
        flags
    }

    fn job(&self, defaults: &CanDefaults) -> SendJob {
        let mut retry = RetryPolicy::from(defaults);
        if let Some(retries) = self.retries {
            retry.max_retries = retries;
        }

        SendJob {
            id: self.id,
            dlc: self.len,
            flags: self.flags(),
            count: (self.count > 0).then_some(self.count),
            delay: Duration::from_millis(self.delay_ms),
            fd: self.fd,
            retry,
        }
    }
}

#[derive(Args, Debug)]
struct CanRecvArgs {
    /// CAN interface (number, alias or name)
    #[arg(short = 'i', long = "iface")]
    iface: String,

    /// Bitrate (Hz)
    #[arg(short = 'b', long)]
    bitrate: Option<u32>,

    /// Comma-separated filter list, id:mask in hex (e.g. 023:fff,006:00f)
    #[arg(
        short = 'f',
        long,
        long_help = "Comma-separated filter list, id:mask in hex (e.g. 023:fff,006:00f). \
                     Malformed entries are skipped with a warning; a list with no valid \
                     entry is an error. Without -f every frame is accepted."
    )]
    filters: Option<String>,

    /// CAN FD data bitrate (Hz)
    #[arg(short = 'd', long = "dbitrate")]
    data_bitrate: Option<u32>,

    /// Bitrate sample point (0..1)
    #[arg(short = 's', long = "sample-point")]
    sample_point: Option<f32>,

    /// CAN FD data bitrate sample point (0..1)
    #[arg(short = 'a', long = "data-sample-point")]
    data_sample_point: Option<f32>,

    /// Enable CAN FD support
    #[arg(short = 'o', long)]
    fd: bool,

    /// Print frame details
    #[arg(short = 'p', long = "print-info")]
    print_info: bool,

    /// Print a running frame counter
    #[arg(short = 'c', long = "print-count")]
    print_count: bool,
}

impl CanRecvArgs {
    fn interface_config(&self, defaults: &CanDefaults) -> CanInterfaceConfig {
        let mut config = CanInterfaceConfig::new(self.bitrate.unwrap_or(defaults.bitrate))
            .with_fd(self.fd)
            .with_rx_buffer_length(defaults.rx_buffer_length.min(MAX_RECEPTION_BUFFER));

        if let Some(sp) = self.sample_point {
            config = config.with_sample_point(sp);
        }
        if let Some(dbitrate) = self.data_bitrate {
            config = config.with_data_bitrate(dbitrate);
        }
        if let Some(dsp) = self.data_sample_point {
            config = config.with_data_sample_point(dsp);
        }
        config
    }
}

#[derive(Args, Debug)]
struct GpioArgs {
    /// Push-button GPIO (offset, chip:offset or alias)
    button: String,

    /// LED GPIO (offset, chip:offset or alias)
    led: String,

    /// Button presses to wait for in each mode
    #[arg(long, default_value_t = 6, value_parser = clap::value_parser!(u64).range(1..))]
    presses: u64,
}

#[derive(Args, Debug)]
struct WatchdogArgs {
    /// Watchdog device
    #[arg(default_value = watchdog::DEFAULT_DEVICE)]
    device: PathBuf,

    /// Watchdog timeout (s)
    #[arg(
        default_value_t = watchdog::DEFAULT_TIMEOUT,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    timeout: u32,

    /// Refresh phase length (s); the board resets about `timeout` seconds later
    #[arg(
        default_value_t = watchdog::DEFAULT_TEST_TIME,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    test_time: u32,
}

fn parse_hex_id(s: &str) -> std::result::Result<u32, String> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u32::from_str_radix(digits, 16).map_err(|e| format!("invalid hex id '{}': {}", s, e))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    logging::init(cli.verbose);

    match run(cli).await {
        Ok(RunOutcome::Completed) => ExitCode::SUCCESS,
        Ok(RunOutcome::Interrupted(sig)) => {
            tracing::info!("Stopped by {}", sig);
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<RunOutcome> {
    if let Commands::ExampleConfig = cli.command {
        print!("{}", EXAMPLE_SETTINGS);
        return Ok(RunOutcome::Completed);
    }

    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::CanSend(args) => can_send(&args, &settings).await,
        Commands::CanRecv(args) => can_recv(&args, &settings).await,
        Commands::Gpio(args) => gpio(&args, &settings).await,
        Commands::Watchdog(args) => watchdog(&args).await,
        Commands::ExampleConfig => Ok(RunOutcome::Completed),
    }
}

fn outcome(shutdown: &Shutdown) -> RunOutcome {
    shutdown
        .signal()
        .map_or(RunOutcome::Completed, RunOutcome::Interrupted)
}

// ============================================================================
// can-send
// ============================================================================

async fn can_send(args: &CanSendArgs, settings: &Settings) -> Result<RunOutcome> {
    let iface = settings.aliases.resolve_can(&args.iface.parse()?);
    let job = args.job(&settings.can);
    job.validate()?;
    let config =
        CanInterfaceConfig::new(args.bitrate.unwrap_or(settings.can.bitrate)).with_fd(args.fd);

    let shutdown = Shutdown::new();
    register_termination_handlers(&shutdown)?;

    let mut lifecycle = Lifecycle::new();
    println!("Requesting CAN interface {}...", iface);
    lifecycle.request(|| can::configure(&SocketCanDriver, &iface, config))?;
    lifecycle.mark_running()?;

    let result = send_frames(lifecycle.handle()?, &job, &shutdown).await;

    lifecycle.cleanup();
    println!("CAN send finished");
    result
}

async fn send_frames(
    handle: &CanHandle<SocketCanTransport>,
    job: &SendJob,
    shutdown: &Shutdown,
) -> Result<RunOutcome> {
    let mut rng = StdRng::from_entropy();

    let summary = can::run_send_job(handle, job, shutdown, &mut rng).await?;
    println!("Sent {} frame(s) on {}", summary.sent, handle.interface());

    if !summary.interrupted {
        shutdown.sleep(SEND_LINGER).await;
    }
    Ok(outcome(shutdown))
}

// ============================================================================
// can-recv
// ============================================================================

async fn can_recv(args: &CanRecvArgs, settings: &Settings) -> Result<RunOutcome> {
    let iface = settings.aliases.resolve_can(&args.iface.parse()?);
    let filters = match args.filters.as_deref() {
        Some(s) => can::parse_filters(s)?,
        None => Vec::new(),
    };
    let config = args.interface_config(&settings.can);
    let poll_interval = Duration::from_millis(settings.can.rx_poll_interval_ms);

    let shutdown = Shutdown::new();
    register_termination_handlers(&shutdown)?;

    let mut lifecycle = Lifecycle::new();
    println!("Requesting CAN interface {}...", iface);
    lifecycle.request(|| can::configure(&SocketCanDriver, &iface, config))?;

    let result = async {
        let handle = lifecycle.mark_running()?;
        handle.register_filters(&filters).await?;
        let mut frames = handle.start_receiver(poll_interval, RX_CHANNEL_CAPACITY)?;
        print_frames(&mut frames, args, &shutdown).await
    }
    .await;

    lifecycle.cleanup();
    println!("CAN receive finished");
    result
}

async fn print_frames(
    frames: &mut mpsc::Receiver<ReceivedFrame>,
    args: &CanRecvArgs,
    shutdown: &Shutdown,
) -> Result<RunOutcome> {
    let mut heartbeat = interval_at(Instant::now() + HEARTBEAT, HEARTBEAT);
    let mut count = 0u64;

    loop {
        tokio::select! {
            sig = shutdown.wait() => return Ok(RunOutcome::Interrupted(sig)),
            _ = heartbeat.tick() => println!("Waiting for CAN frames..."),
            received = frames.recv() => {
                let Some(received) = received else {
                    return Err(HwError::Peripheral("CAN receive task stopped".into()));
                };
                count += 1;
                print_frame(&received, count, args);
            }
        }
    }
}

fn print_frame(received: &ReceivedFrame, count: u64, args: &CanRecvArgs) {
    if args.print_count {
        println!("CAN frame       {}", count);
    } else {
        println!("CAN frame");
    }

    if args.print_info {
        let frame = &received.frame;
        let data: Vec<String> = frame.data().iter().map(|b| format!("{:02x}", b)).collect();

        println!(" - Time:        {}", received.timestamp.format("%s%.6f"));
        println!(
            " - Type:        {}",
            if frame.is_extended() {
                "Extended ID"
            } else {
                "Standard ID"
            }
        );
        println!(" - ID:          {:x}", frame.id());
        println!(" - Data length: {}", frame.dlc());
        println!(" - Data:        {}", data.join(":"));
        println!();
    }
}

// ============================================================================
// gpio
// ============================================================================

async fn gpio(args: &GpioArgs, settings: &Settings) -> Result<RunOutcome> {
    let button = GpioLine::resolve(&args.button.parse()?, &settings.aliases)?;
    let led = GpioLine::resolve(&args.led.parse()?, &settings.aliases)?;

    let shutdown = Shutdown::new();
    register_termination_handlers(&shutdown)?;

    let mut lifecycle = Lifecycle::new();
    lifecycle
        .request_async(|| GpioHandle::request(button, led))
        .await?;

    let result = async {
        let handle = lifecycle.mark_running()?;
        toggle_test(handle, args, &shutdown).await
    }
    .await;

    lifecycle.cleanup();
    result
}

async fn toggle_test(
    gpio: &mut GpioHandle,
    args: &GpioArgs,
    shutdown: &Shutdown,
) -> Result<RunOutcome> {
    println!("[INFO] Testing blocking mode");
    println!("Press the button (for {} events):", args.presses);
    for press in 1..=args.presses {
        if !gpio.wait_rising_edge(shutdown).await? {
            return Ok(outcome(shutdown));
        }
        println!("Press {}; toggling output GPIO", press);
        gpio.toggle_led().await?;
    }

    println!("[INFO] Testing asynchronous mode");
    println!("Waiting until {} edges have been detected", args.presses);
    gpio.start_edge_watch()?;

    while gpio.edges() < args.presses {
        println!("Waiting ...");
        tokio::select! {
            err = gpio.watcher_stopped() => return Err(err),
            sig = shutdown.wait() => return Ok(RunOutcome::Interrupted(sig)),
            _ = tokio::time::sleep(HEARTBEAT) => {}
        }
    }

    println!("No remaining edges. Test finished");
    Ok(RunOutcome::Completed)
}

// ============================================================================
// watchdog
// ============================================================================

async fn watchdog(args: &WatchdogArgs) -> Result<RunOutcome> {
    let shutdown = Shutdown::new();
    register_termination_handlers(&shutdown)?;

    let mut lifecycle = Lifecycle::new();
    println!("Requesting watchdog {}...", args.device.display());
    lifecycle.request(|| WatchdogHandle::open(&args.device))?;

    let result = async {
        let wd = lifecycle.mark_running()?;
        watchdog_test(wd, args, &shutdown).await
    }
    .await;

    lifecycle.cleanup();
    result
}

async fn watchdog_test(
    wd: &mut WatchdogHandle,
    args: &WatchdogArgs,
    shutdown: &Shutdown,
) -> Result<RunOutcome> {
    let timeout = wd.set_timeout(args.timeout)?;
    println!("Watchdog timeout modified to {} seconds", timeout);

    for remaining in (1..=args.test_time).rev() {
        println!("Refreshing watchdog timer ({} s)", remaining);
        wd.keepalive()?;
        if !shutdown.sleep(WATCHDOG_TICK).await {
            return Ok(outcome(shutdown));
        }
    }

    for remaining in (0..timeout).rev() {
        println!("System will reboot in {} s", remaining);
        if !shutdown.sleep(WATCHDOG_TICK).await {
            return Ok(outcome(shutdown));
        }
    }

    Ok(RunOutcome::Completed)
}
