//! GPIO button/LED peripheral.
//!
//! Requests one input line (push button) with rising edge detection and one
//! output line (LED), and toggles the LED on every rising edge of the
//! button, either by waiting in the caller's task or from a background
//! watcher. Edges come from the kernel's line event queue, so short presses
//! between two reads are not lost.
//!
//! # Platform Support
//!
//! **Linux only**: Uses tokio-gpiod (libgpiod v2 character device interface).
//!
//! # Example
//!
//! ```rust,ignore
//! use hwkit::protocols::gpio::{GpioHandle, GpioLine};
//!
//! let button: GpioLine = "gpiochip0:17".parse()?;
//! let led: GpioLine = "gpiochip0:18".parse()?;
//!
//! let mut gpio = GpioHandle::request(button, led).await?;
//! gpio.start_edge_watch()?;
//! while gpio.edges() < 6 {
//!     tokio::select! {
//!         err = gpio.watcher_stopped() => return Err(err),
//!         _ = tokio::time::sleep(Duration::from_secs(5)) => {}
//!     }
//! }
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_gpiod::{Chip, Edge, EdgeDetect, Input, Lines, Options, Output};

use crate::core::config::AliasTable;
use crate::core::error::{HwError, Result};
use crate::core::identifier::Identifier;
use crate::core::lifecycle::Peripheral;
use crate::core::shutdown::Shutdown;

/// Chip used when only a line offset is given.
pub const DEFAULT_CHIP: &str = "gpiochip0";

const CONSUMER: &str = "hwkit";

/// A line on a GPIO chip.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GpioLine {
    /// Chip name (e.g., "gpiochip0").
    pub chip: String,
    /// Line offset on the chip.
    pub offset: u32,
}

impl GpioLine {
    /// Create a line reference.
    pub fn new(chip: impl Into<String>, offset: u32) -> Self {
        Self {
            chip: chip.into(),
            offset,
        }
    }

    /// Resolve a command-line identifier.
    ///
    /// A number is an offset on [`DEFAULT_CHIP`]; a name is looked up in the
    /// GPIO aliases and otherwise parsed as `chip:offset`. A name matching
    /// neither is an acquisition failure, like an interface that does not
    /// exist.
    pub fn resolve(ident: &Identifier, aliases: &AliasTable) -> Result<Self> {
        match ident {
            Identifier::Number(offset) => Ok(Self::new(DEFAULT_CHIP, *offset)),
            Identifier::Name(name) => match aliases.gpio_alias(name) {
                Some(target) => {
                    tracing::debug!("GPIO alias '{}' -> {}", name, target);
                    target.parse()
                }
                None => name.parse().map_err(|_| {
                    HwError::acquire(format!("GPIO '{}'", name), "no such alias or line")
                }),
            },
        }
    }
}

impl FromStr for GpioLine {
    type Err = HwError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (chip, offset) = match s.rsplit_once(':') {
            Some((chip, offset)) if !chip.is_empty() => (chip, offset),
            Some(_) => return Err(HwError::invalid(format!("missing GPIO chip in '{}'", s))),
            None => (DEFAULT_CHIP, s),
        };

        let offset = offset
            .parse::<u32>()
            .map_err(|_| HwError::invalid(format!("invalid GPIO line offset in '{}'", s)))?;

        Ok(Self::new(chip, offset))
    }
}

impl fmt::Display for GpioLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chip, self.offset)
    }
}

/// Source of rising edges on the button line.
#[async_trait]
pub(crate) trait EdgeSource: Send {
    /// Wait for the next rising edge.
    async fn next_rising_edge(&mut self) -> Result<()>;
}

/// Writable LED line.
#[async_trait]
pub(crate) trait LedOutput: Send + Sync {
    async fn set_level(&self, on: bool) -> Result<()>;
}

struct ButtonEvents {
    line: GpioLine,
    lines: Lines<Input>,
}

#[async_trait]
impl EdgeSource for ButtonEvents {
    async fn next_rising_edge(&mut self) -> Result<()> {
        loop {
            let event = self.lines.read_event().await.map_err(|e| {
                HwError::Peripheral(format!("Failed to read GPIO {} event: {}", self.line, e))
            })?;
            if matches!(event.edge, Edge::Rising) {
                return Ok(());
            }
        }
    }
}

struct LedLine {
    line: GpioLine,
    lines: Lines<Output>,
}

#[async_trait]
impl LedOutput for LedLine {
    async fn set_level(&self, on: bool) -> Result<()> {
        self.lines
            .set_values([on])
            .await
            .map_err(|e| HwError::Peripheral(format!("Failed to write GPIO {}: {}", self.line, e)))
    }
}

async fn open_chip(line: &GpioLine) -> Result<Chip> {
    Chip::new(&line.chip)
        .await
        .map_err(|e| HwError::acquire(format!("GPIO chip '{}'", line.chip), e))
}

/// Invert the LED and remember the new state.
async fn toggle(output: &dyn LedOutput, led_on: &AtomicBool) -> Result<bool> {
    let next = !led_on.load(Ordering::SeqCst);
    output.set_level(next).await?;
    led_on.store(next, Ordering::SeqCst);
    Ok(next)
}

/// Toggle the LED on every edge until the source or the LED fails.
async fn watch_edges(
    mut source: Box<dyn EdgeSource>,
    output: Arc<dyn LedOutput>,
    led_on: Arc<AtomicBool>,
    edges: Arc<AtomicU64>,
) -> Result<()> {
    loop {
        source.next_rising_edge().await?;
        tracing::info!("Input GPIO interrupt detected; toggling output GPIO");
        toggle(output.as_ref(), &led_on).await?;
        edges.fetch_add(1, Ordering::SeqCst);
    }
}

/// Requested button and LED lines.
pub struct GpioHandle {
    button: GpioLine,
    led: GpioLine,
    input: Option<Box<dyn EdgeSource>>,
    output: Option<Arc<dyn LedOutput>>,
    led_on: Arc<AtomicBool>,
    edges: Arc<AtomicU64>,
    watcher: Option<JoinHandle<Result<()>>>,
}

impl fmt::Debug for GpioHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpioHandle")
            .field("button", &self.button)
            .field("led", &self.led)
            .field("led_on", &self.led_on())
            .field("edges", &self.edges())
            .field("watching", &self.watcher.is_some())
            .finish()
    }
}

impl GpioHandle {
    /// Request `button` as input with rising edge detection and `led` as
    /// output (initially low).
    pub async fn request(button: GpioLine, led: GpioLine) -> Result<Self> {
        let chip = open_chip(&button).await?;
        let opts = Options::input([button.offset])
            .edge(EdgeDetect::Rising)
            .consumer(CONSUMER);
        let input = chip
            .request_lines(opts)
            .await
            .map_err(|e| HwError::acquire(format!("input GPIO {}", button), e))?;

        let chip = open_chip(&led).await?;
        let opts = Options::output([led.offset])
            .consumer(CONSUMER)
            .values([false]);
        let output = chip
            .request_lines(opts)
            .await
            .map_err(|e| HwError::acquire(format!("output GPIO {}", led), e))?;

        let source = ButtonEvents {
            line: button.clone(),
            lines: input,
        };
        let sink = LedLine {
            line: led.clone(),
            lines: output,
        };
        Ok(Self::from_parts(button, led, Box::new(source), Arc::new(sink)))
    }

    pub(crate) fn from_parts(
        button: GpioLine,
        led: GpioLine,
        input: Box<dyn EdgeSource>,
        output: Arc<dyn LedOutput>,
    ) -> Self {
        Self {
            button,
            led,
            input: Some(input),
            output: Some(output),
            led_on: Arc::new(AtomicBool::new(false)),
            edges: Arc::new(AtomicU64::new(0)),
            watcher: None,
        }
    }

    fn output(&self) -> Result<&Arc<dyn LedOutput>> {
        self.output.as_ref().ok_or(HwError::NotAcquired)
    }

    /// Current LED state as last written.
    pub fn led_on(&self) -> bool {
        self.led_on.load(Ordering::SeqCst)
    }

    /// Invert the LED and return the new state.
    pub async fn toggle_led(&self) -> Result<bool> {
        toggle(self.output()?.as_ref(), &self.led_on).await
    }

    /// Wait for the next rising edge on the button.
    ///
    /// Returns `false` if shutdown was requested first.
    pub async fn wait_rising_edge(&mut self, shutdown: &Shutdown) -> Result<bool> {
        if self.watcher.is_some() {
            return Err(HwError::invalid("edge watcher already running"));
        }
        let input = self.input.as_mut().ok_or(HwError::NotAcquired)?;

        tokio::select! {
            edge = input.next_rising_edge() => edge.map(|()| true),
            _ = shutdown.wait() => Ok(false),
        }
    }

    /// Hand the button line to a background task that toggles the LED on
    /// each rising edge and counts the edges.
    ///
    /// The task ends on the first read or write error; see
    /// [`watcher_stopped`](Self::watcher_stopped).
    pub fn start_edge_watch(&mut self) -> Result<()> {
        if self.watcher.is_some() {
            return Err(HwError::invalid("edge watcher already running"));
        }

        let output = Arc::clone(self.output()?);
        let source = self.input.take().ok_or(HwError::NotAcquired)?;
        let led_on = Arc::clone(&self.led_on);
        let edges = Arc::clone(&self.edges);

        self.watcher = Some(tokio::spawn(async move {
            let result = watch_edges(source, output, led_on, edges).await;
            if let Err(e) = &result {
                tracing::error!("GPIO edge watcher stopped: {}", e);
            }
            result
        }));
        Ok(())
    }

    /// Resolves with the error that ended the background watcher. Never
    /// resolves while the watcher runs or when none was started.
    pub async fn watcher_stopped(&mut self) -> HwError {
        let Some(task) = self.watcher.as_mut() else {
            return std::future::pending().await;
        };

        let joined = task.await;
        self.watcher = None;
        match joined {
            Ok(Err(e)) => e,
            Ok(Ok(())) => HwError::Peripheral("GPIO edge watcher stopped".to_string()),
            Err(e) => HwError::Peripheral(format!("GPIO edge watcher failed: {}", e)),
        }
    }

    /// Rising edges seen by the background watcher.
    #[inline]
    pub fn edges(&self) -> u64 {
        self.edges.load(Ordering::SeqCst)
    }
}

impl Peripheral for GpioHandle {
    fn describe(&self) -> String {
        format!("GPIO button {} / LED {}", self.button, self.led)
    }

    fn stop(&mut self) {
        if let Some(task) = self.watcher.take() {
            task.abort();
        }
    }

    fn release(&mut self) -> Result<()> {
        self.stop();
        self.input.take();
        self.output.take();
        Ok(())
    }
}
