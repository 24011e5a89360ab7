//! main.rs - Fullscreen snowfall compositor
//! Window setup, background textures, touch input, and the frame loop

use std::fs;
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use embedded_graphics::{
    image::{Image, ImageRawBE},
    pixelcolor::Rgb565,
    prelude::*,
    primitives::{PrimitiveStyle, Rectangle},
};
use embedded_graphics_simulator::{
    OutputSettingsBuilder, SimulatorDisplay, SimulatorEvent, Window,
};
use evdev::{AbsoluteAxisType, Device, EventType};
use image::imageops::FilterType;
use tracing::{error, info, warn};
use tracing_subscriber::filter::EnvFilter;

use snowglobe::{BackgroundSelector, Settings, SnowSystem, TouchEvent};

const NUM_SNOWFLAKES: usize = 80;
const IMAGE_DIR: &str = "./images";
const FRAME_INTERVAL: Duration = Duration::from_millis(10);
const FLAKE_COLOR: Rgb565 = Rgb565::WHITE;

#[derive(Debug, PartialEq, Eq)]
struct Config {
    width: i32,
    height: i32,
    device: PathBuf,
}

#[derive(Debug, PartialEq, Eq)]
enum ArgError {
    Help,
    Invalid,
}

fn print_usage() {
    println!("Usage: snowglobe -w WIDTH -h HEIGHT -e DEVICE");
    println!("Options:");
    println!("  -w WIDTH          Set the screen width");
    println!("  -h HEIGHT         Set the screen height");
    println!("  -e DEVICE         Set the touchscreen input device");
    println!("  --help            Show this help message and exit");
}

/// Help wins over validation; anything missing, unknown, malformed, or
/// non-positive is `Invalid`.
fn parse_args(args: &[String]) -> Result<Config, ArgError> {
    if args.iter().any(|arg| arg == "--help") {
        return Err(ArgError::Help);
    }

    let mut width = 0i32;
    let mut height = 0i32;
    let mut device = None;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-w" => width = next_int(args, i)?,
            "-h" => height = next_int(args, i)?,
            "-e" => device = Some(PathBuf::from(args.get(i + 1).ok_or(ArgError::Invalid)?)),
            _ => return Err(ArgError::Invalid),
        }
        i += 2;
    }

    if width <= 0 || height <= 0 {
        return Err(ArgError::Invalid);
    }
    let device = device.ok_or(ArgError::Invalid)?;
    Ok(Config {
        width,
        height,
        device,
    })
}

fn next_int(args: &[String], i: usize) -> Result<i32, ArgError> {
    args.get(i + 1)
        .and_then(|value| value.parse().ok())
        .ok_or(ArgError::Invalid)
}

/// Fullscreen-sized background frame, big-endian RGB565.
struct Background {
    data: Vec<u8>,
    width: u32,
}

/// Loads every `.jpg` in `dir`, pre-scaled to the output size. Files that
/// fail to decode are skipped; an empty result is an error.
fn load_backgrounds(dir: &Path, width: u32, height: u32) -> Result<Vec<Background>> {
    let entries = fs::read_dir(dir)
        .with_context(|| format!("failed to open image directory {}", dir.display()))?;

    let mut backgrounds = Vec::new();
    for entry in entries {
        let entry = entry.context("failed to read image directory entry")?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("jpg") {
            continue;
        }
        let decoded = match image::open(&path) {
            Ok(decoded) => decoded,
            Err(err) => {
                warn!("skipping {}: {err}", path.display());
                continue;
            }
        };
        let scaled = decoded.resize_exact(width, height, FilterType::Triangle).to_rgb8();
        let mut data = Vec::with_capacity((width * height * 2) as usize);
        for pixel in scaled.pixels() {
            // RGB888 -> RGB565, big-endian as ImageRawBE expects.
            let [r, g, b] = pixel.0;
            let value = ((r as u16 & 0xf8) << 8) | ((g as u16 & 0xfc) << 3) | (b as u16 >> 3);
            data.extend_from_slice(&value.to_be_bytes());
        }
        info!("loaded background {}", path.display());
        backgrounds.push(Background { data, width });
    }

    if backgrounds.is_empty() {
        bail!("no usable .jpg images in {}", dir.display());
    }
    Ok(backgrounds)
}

/// Non-blocking reader over the touchscreen event node.
struct TouchPad {
    device: Device,
}

impl TouchPad {
    fn open(path: &Path) -> Result<Self> {
        let device = Device::open(path)
            .with_context(|| format!("failed to open input device {}", path.display()))?;
        set_nonblocking(&device)
            .with_context(|| format!("failed to set {} non-blocking", path.display()))?;
        Ok(Self { device })
    }

    /// Drains every queued event into the selector. Returns immediately
    /// once the kernel queue is empty.
    fn drain_into(&mut self, selector: &mut BackgroundSelector) {
        loop {
            match self.device.fetch_events() {
                Ok(events) => {
                    for event in events {
                        selector.handle(classify(&event));
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    warn!("touch device read failed: {err}");
                    break;
                }
            }
        }
    }
}

fn classify(event: &evdev::InputEvent) -> TouchEvent {
    if event.event_type() == EventType::ABSOLUTE
        && (event.code() == AbsoluteAxisType::ABS_X.0 || event.code() == AbsoluteAxisType::ABS_Y.0)
    {
        TouchEvent::Motion
    } else if event.event_type() == EventType::SYNCHRONIZATION {
        TouchEvent::Sync
    } else {
        TouchEvent::Other
    }
}

fn set_nonblocking(device: &Device) -> io::Result<()> {
    // fcntl on a descriptor we own and keep open for the device's lifetime.
    let fd = device.as_raw_fd();
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn clock_seed() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as u32)
        .unwrap_or(1)
}

fn run(config: &Config) -> Result<()> {
    let width = config.width as u32;
    let height = config.height as u32;

    let mut display = SimulatorDisplay::<Rgb565>::new(Size::new(width, height));
    let output_settings = OutputSettingsBuilder::new().build();
    let mut window = Window::new("Snowglobe", &output_settings);

    let backgrounds = load_backgrounds(Path::new(IMAGE_DIR), width, height)?;
    info!("loaded {} backgrounds", backgrounds.len());

    let mut touch = TouchPad::open(&config.device)?;

    let settings = Settings {
        screen_width: config.width,
        screen_height: config.height,
        rng_seed: clock_seed(),
        ..Settings::default()
    };
    let mut snow: SnowSystem<NUM_SNOWFLAKES> = SnowSystem::new(settings);
    let mut selector = BackgroundSelector::new(backgrounds.len());
    info!(
        "simulating {} flakes at {}x{}",
        NUM_SNOWFLAKES, config.width, config.height
    );

    let flake_style = PrimitiveStyle::with_fill(FLAKE_COLOR);
    let mut running = true;
    while running {
        let frame_start = Instant::now();

        touch.drain_into(&mut selector);
        snow.advance_wind();

        let background = &backgrounds[selector.cursor()];
        let raw = ImageRawBE::<Rgb565>::new(&background.data, background.width);
        Image::new(&raw, Point::zero()).draw(&mut display).unwrap();

        for i in 0..NUM_SNOWFLAKES {
            let flake = snow.flakes[i];
            Rectangle::new(
                Point::new(flake.x, flake.y),
                Size::new(flake.size as u32, flake.size as u32),
            )
            .into_styled(flake_style)
            .draw(&mut display)
            .unwrap();
            snow.update_flake(i);
        }

        window.update(&display);
        for event in window.events() {
            if let SimulatorEvent::Quit = event {
                running = false;
            }
        }

        let elapsed = frame_start.elapsed();
        if elapsed < FRAME_INTERVAL {
            thread::sleep(FRAME_INTERVAL - elapsed);
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = match parse_args(&args) {
        Ok(config) => config,
        Err(ArgError::Help) => {
            print_usage();
            return ExitCode::SUCCESS;
        }
        Err(ArgError::Invalid) => {
            print_usage();
            return ExitCode::from(1);
        }
    };

    if let Err(err) = run(&config) {
        error!("{err:#}");
        return ExitCode::from(2);
    }
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|arg| arg.to_string()).collect()
    }

    #[test]
    fn parses_full_invocation() {
        let parsed = parse_args(&args(&["-w", "1920", "-h", "1080", "-e", "/dev/input/event0"]));
        assert_eq!(
            parsed,
            Ok(Config {
                width: 1920,
                height: 1080,
                device: PathBuf::from("/dev/input/event0"),
            })
        );
    }

    #[test]
    fn help_wins_over_validation() {
        assert_eq!(parse_args(&args(&["--help"])), Err(ArgError::Help));
        assert_eq!(
            parse_args(&args(&["-w", "0", "--help"])),
            Err(ArgError::Help)
        );
    }

    #[test]
    fn no_arguments_is_invalid() {
        assert_eq!(parse_args(&[]), Err(ArgError::Invalid));
    }

    #[test]
    fn missing_device_is_invalid() {
        assert_eq!(
            parse_args(&args(&["-w", "800", "-h", "600"])),
            Err(ArgError::Invalid)
        );
    }

    #[test]
    fn nonpositive_dimensions_are_invalid() {
        assert_eq!(
            parse_args(&args(&["-w", "0", "-h", "600", "-e", "/dev/input/event0"])),
            Err(ArgError::Invalid)
        );
        assert_eq!(
            parse_args(&args(&["-w", "800", "-h", "-600", "-e", "/dev/input/event0"])),
            Err(ArgError::Invalid)
        );
    }

    #[test]
    fn malformed_number_is_invalid() {
        assert_eq!(
            parse_args(&args(&["-w", "wide", "-h", "600", "-e", "/dev/input/event0"])),
            Err(ArgError::Invalid)
        );
    }

    #[test]
    fn unknown_flag_is_invalid() {
        assert_eq!(parse_args(&args(&["-z", "1"])), Err(ArgError::Invalid));
    }

    fn temp_image_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("snowglobe-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn loads_and_scales_jpg_backgrounds() {
        let dir = temp_image_dir("load");
        image::RgbImage::from_pixel(8, 8, image::Rgb([255, 0, 0]))
            .save(dir.join("red.jpg"))
            .unwrap();
        image::RgbImage::from_pixel(8, 8, image::Rgb([0, 0, 255]))
            .save(dir.join("ignored.png"))
            .unwrap();
        fs::write(dir.join("broken.jpg"), b"not a jpeg").unwrap();

        let backgrounds = load_backgrounds(&dir, 16, 12).unwrap();
        assert_eq!(backgrounds.len(), 1);
        assert_eq!(backgrounds[0].width, 16);
        assert_eq!(backgrounds[0].data.len(), 16 * 12 * 2);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn empty_image_dir_is_fatal() {
        let dir = temp_image_dir("empty");
        assert!(load_backgrounds(&dir, 16, 12).is_err());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_image_dir_is_fatal() {
        let dir = std::env::temp_dir().join("snowglobe-does-not-exist");
        assert!(load_backgrounds(&dir, 16, 12).is_err());
    }

    #[test]
    fn classifies_device_events() {
        use evdev::InputEvent;
        let motion_x = InputEvent::new(EventType::ABSOLUTE, AbsoluteAxisType::ABS_X.0, 120);
        let motion_y = InputEvent::new(EventType::ABSOLUTE, AbsoluteAxisType::ABS_Y.0, 80);
        let pressure = InputEvent::new(EventType::ABSOLUTE, AbsoluteAxisType::ABS_PRESSURE.0, 1);
        let sync = InputEvent::new(EventType::SYNCHRONIZATION, 0, 0);
        let key = InputEvent::new(EventType::KEY, 0x14a, 1);

        assert_eq!(classify(&motion_x), TouchEvent::Motion);
        assert_eq!(classify(&motion_y), TouchEvent::Motion);
        assert_eq!(classify(&pressure), TouchEvent::Other);
        assert_eq!(classify(&sync), TouchEvent::Sync);
        assert_eq!(classify(&key), TouchEvent::Other);
    }
}
