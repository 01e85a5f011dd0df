// odilectl -- command-line tool for ODILE CCD readout boards.
//
// Usage:
//   odilectl command GCT --response
//   odilectl command RDC --response
//   odilectl command RDP --file sequencer.txt
//   odilectl config --config config.ini
//   odilectl config --config config.ini --flash --page 2
//   odilectl config --write-default
//   odilectl firmware --file odile.rpd
//   odilectl read-epcq --file flash.bin --start 0x01F60000 --words 128
//   odilectl capture --port 0x1202 --file stream.bin --duration 10
//   odilectl send-data --file sequencer.txt --port 0x2000
//   odilectl image --file test.fits --config config.ini --nrows 6000 --ncols 1100
//
// Every command accepts --ip (board address) and --server (this host's
// address on the board's network).

use std::io::{self, Write};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use odile::command::CommandResponse;
use odile::{Controller, ControllerBuilder, ReadoutInfo};
use odile_config::ini::parse_c_integer;
use odile_core::COMMAND_PORT;
use odile_fits::FitsImageSinkFactory;

/// Flash address of the application firmware image.
const APPLICATION_ADDRESS: u32 = 0x0100_0000;

/// Temporary output for CABAC register reads when no file is given.
const CABAC_TEMP_FILE: &str = "temp_cabac_delete.txt";

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Control, configure and flash ODILE boards over Ethernet.
#[derive(Parser)]
#[command(name = "odilectl", version, about)]
struct Cli {
    /// IP address of the ODILE board.
    #[arg(short, long, global = true, default_value = "192.168.0.3")]
    ip: IpAddr,

    /// IP address of this host on the board's network.
    #[arg(short, long, global = true, default_value = "192.168.0.1")]
    server: IpAddr,

    /// Enable debug output.
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send a 3-character command to the board.
    Command {
        /// Command to send (see the firmware documentation, or `GCL`).
        command: String,

        /// 8-bit prefix passed in the top byte of the command word.
        #[arg(short, long, default_value = "0", value_parser = parse_u8)]
        prefix: u8,

        /// Second 32-bit word sent after the command.
        #[arg(short = 'w', long, value_parser = parse_u32)]
        second: Option<u32>,

        /// Wait for and print the board's response.
        #[arg(short, long)]
        response: bool,

        /// File to dump data to for commands that stream a reply
        /// (sequencer, register and CABAC reads).
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Send a configuration file to the board, or store it in flash.
    Config {
        /// Configuration file to read.
        #[arg(short, long, default_value = "config.ini")]
        config: PathBuf,

        /// Write the configuration to flash instead of applying it.
        #[arg(short, long)]
        flash: bool,

        /// Flash configuration page.
        #[arg(short, long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=9))]
        page: u8,

        /// Regenerate default.ini with every register and its description.
        #[arg(short, long)]
        write_default: bool,
    },

    /// Write new firmware to the board's flash.
    Firmware {
        /// .rpd file containing the firmware.
        #[arg(short, long)]
        file: PathBuf,

        /// .map file giving the image's end address (default: the .rpd
        /// path with a .map extension).
        #[arg(short, long)]
        map: Option<PathBuf>,

        /// Start address in bytes.
        #[arg(short, long, default_value = "0x01000000", value_parser = parse_u32)]
        address: u32,

        /// Allow writing to an address other than the application image.
        #[arg(long)]
        force: bool,
    },

    /// Dump words from the board's flash to a file.
    ReadEpcq {
        /// Output file (network-order words).
        #[arg(short, long, default_value = "out_data.bin")]
        file: PathBuf,

        /// Start address in bytes.
        #[arg(short = 'a', long, default_value = "0", value_parser = parse_u32)]
        start: u32,

        /// Number of words to read.
        #[arg(short = 'n', long, default_value = "100", value_parser = parse_u32)]
        words: u32,
    },

    /// Capture datagrams arriving on a port into a file.
    Capture {
        /// UDP port to receive on.
        #[arg(short, long, default_value = "0x1000", value_parser = parse_u16)]
        port: u16,

        /// Output file: .fits, .txt, or anything else for raw binary.
        #[arg(short, long, default_value = "out_data.bin")]
        file: PathBuf,

        /// Frame rows (0 = unknown).
        #[arg(short, long, default_value_t = 0)]
        rows: u32,

        /// Frame columns (0 = unknown).
        #[arg(short, long, default_value_t = 0)]
        cols: u32,

        /// Seconds to capture for.
        #[arg(short = 't', long, default_value_t = 10)]
        duration: u64,
    },

    /// Send whitespace-separated words from a text file to a board port.
    SendData {
        /// File of words to send.
        #[arg(short, long)]
        file: PathBuf,

        /// UDP port on the board.
        #[arg(short, long, default_value = "0x2000", value_parser = parse_u16)]
        port: u16,
    },

    /// Configure the board, read out an image and write it as FITS.
    Image {
        /// Output image file.
        #[arg(short, long, default_value = "test.fits")]
        file: PathBuf,

        /// Configuration file to apply before reading out.
        #[arg(short, long, default_value = "config.ini")]
        config: PathBuf,

        /// UDP port image data arrives on.
        #[arg(short, long, default_value = "0x1202", value_parser = parse_u16)]
        port: u16,

        /// CCD columns to read (in non-skipper mode, cols * NDCMs).
        #[arg(short, long, default_value_t = 1100)]
        ncols: u32,

        /// CCD rows to read.
        #[arg(short = 'r', long, default_value_t = 6000)]
        nrows: u32,

        /// Number of charge measurements per pixel.
        #[arg(short = 'k', long, default_value_t = 1)]
        nskips: u16,

        /// Have the board average over `nskips` measurements.
        #[arg(short = 'a', long)]
        average_skips: bool,

        /// Samples per trigger to average over.
        #[arg(short = 'S', long)]
        samples: Option<u16>,

        /// Amplifier recorded in the header.
        #[arg(long, default_value = "L")]
        amplifier: String,

        /// Exposure time recorded in the header, seconds.
        #[arg(long, default_value_t = 5.0)]
        exposure: f64,

        /// Readout time recorded in the header, seconds.
        #[arg(long, default_value_t = 100.0)]
        read_time: f64,

        /// Give up if the readout stalls for this many seconds.
        #[arg(long)]
        stall_timeout: Option<u64>,
    },
}

fn parse_int<T: TryFrom<i64>>(s: &str) -> std::result::Result<T, String> {
    let value = parse_c_integer(s).ok_or_else(|| format!("invalid integer: {s}"))?;
    T::try_from(value).map_err(|_| format!("out of range: {s}"))
}

fn parse_u8(s: &str) -> std::result::Result<u8, String> {
    parse_int(s)
}

fn parse_u16(s: &str) -> std::result::Result<u16, String> {
    parse_int(s)
}

fn parse_u32(s: &str) -> std::result::Result<u32, String> {
    parse_int(s)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn connect(cli: &Cli) -> Result<Controller> {
    ControllerBuilder::new()
        .device_address(cli.ip)
        .server_address(cli.server)
        .image_sink_factory(Arc::new(FitsImageSinkFactory::new()))
        .build()
        .await
        .with_context(|| format!("failed to open link to ODILE at {}", cli.ip))
}

fn print_progress(progress: f64) {
    const WIDTH: usize = 70;
    let progress = progress.clamp(0.0, 1.0);
    let pos = (WIDTH as f64 * progress) as usize;
    let bar: String = (0..WIDTH)
        .map(|i| match i.cmp(&pos) {
            std::cmp::Ordering::Less => '=',
            std::cmp::Ordering::Equal => '>',
            std::cmp::Ordering::Greater => ' ',
        })
        .collect();
    print!("[{bar}] {} %\r", (progress * 100.0) as u32);
    let _ = io::stdout().flush();
}

/// Port a streaming command replies on, if it has one.
fn reply_port(command: &str) -> Option<u16> {
    match command {
        "RDP" | "RDT" | "RDO" | "RDF" | "RDR" | "RDA" | "RDS" => Some(0x1999),
        "RDB" => Some(0x4268),
        "RDC" => Some(0x2100),
        "GCM" => Some(0x2200),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_command(
    ctl: &mut Controller,
    command: &str,
    prefix: u8,
    second: Option<u32>,
    response: bool,
    file: Option<&Path>,
) -> Result<()> {
    let cabac = matches!(command, "RDC" | "GCM");
    let file = match file {
        Some(f) => Some(f.to_path_buf()),
        None if cabac => Some(PathBuf::from(CABAC_TEMP_FILE)),
        None => None,
    };

    if let (Some(path), Some(port)) = (&file, reply_port(command)) {
        ctl.launch_capture(path, port, 0, 0)
            .await
            .with_context(|| format!("failed to capture to {}", path.display()))?;
        // Give the receiver time to come up before the board replies.
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    let sent = ctl.send_command(command, Some(prefix), second).await?;
    tracing::debug!(bytes = sent, "Command sent");

    if response {
        let timeout = ctl.options().command_timeout;
        let words = ctl
            .receive_data(COMMAND_PORT, timeout)
            .await
            .context("no response from board")?;
        tracing::debug!(
            words = words.len(),
            data = %words.iter().map(|w| format!("{:x}", w & 0x7F_FFFF)).collect::<Vec<_>>().join(" "),
            "Response received"
        );
        println!("{}", CommandResponse::parse(command, &words)?);
    }

    // Let streamed replies arrive.
    tokio::time::sleep(Duration::from_secs(1)).await;
    ctl.close_all_captures().await;

    if cabac && response {
        if let Some(path) = &file {
            let contents = tokio::fs::read_to_string(path).await.unwrap_or_default();
            println!("Register is: {contents}");
            if path == Path::new(CABAC_TEMP_FILE) {
                let _ = tokio::fs::remove_file(path).await;
            }
        }
    }
    Ok(())
}

async fn cmd_config(ctl: &mut Controller, config: &Path, flash: bool, page: u8, write_default: bool) -> Result<()> {
    if write_default {
        odile::ConfigBlockList::default()
            .write_ini_file("default.ini")
            .context("failed to write default.ini")?;
        println!("Wrote default.ini");
        if !config.exists() {
            return Ok(());
        }
    }

    let line = ctl
        .load_config(config)
        .with_context(|| format!("failed to read {}", config.display()))?;
    if line != 0 {
        eprintln!("Warning: {} line {line} could not be parsed", config.display());
    }

    if flash {
        let words = ctl.write_flash_config(usize::from(page)).await?;
        println!("Wrote {words} words to configuration page {page}");
    } else {
        let bytes = ctl.send_config().await?;
        println!("Sent {} configuration words", bytes / 4);
    }
    Ok(())
}

async fn cmd_firmware(ctl: &mut Controller, rpd: &Path, map: Option<&Path>, address: u32, force: bool) -> Result<()> {
    let map = match map {
        Some(m) => m.to_path_buf(),
        None => {
            let m = rpd.with_extension("map");
            println!(".map file not given, assuming file is: {}", m.display());
            m
        }
    };
    if address != APPLICATION_ADDRESS && !force {
        bail!("address {address:#010x} is not the application image, rerun with --force to write firmware there");
    }

    let pages = ctl
        .write_firmware_files(rpd, &map, address, print_progress)
        .await
        .with_context(|| format!("failed to write {}", rpd.display()))?;
    println!();
    println!("Wrote {pages} pages");
    Ok(())
}

async fn cmd_read_epcq(ctl: &mut Controller, file: &Path, start: u32, words: u32) -> Result<()> {
    let mut out = tokio::fs::File::create(file)
        .await
        .with_context(|| format!("failed to create {}", file.display()))?;
    let read = ctl.read_epcq(&mut out, start, words as usize).await?;
    println!("Read {read} words to {}", file.display());
    Ok(())
}

async fn cmd_capture(ctl: &mut Controller, port: u16, file: &Path, rows: u32, cols: u32, duration: u64) -> Result<()> {
    let id = ctl
        .launch_capture(file, port, rows, cols)
        .await
        .with_context(|| format!("failed to capture on port {port:#x}"))?;
    println!("Capturing on port {port:#x} for {duration} s (Ctrl-C to stop early)");

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(duration)) => {}
        _ = tokio::signal::ctrl_c() => println!(),
    }

    let words = ctl.close_capture(id).await?;
    println!("Read a total of {words} words");
    Ok(())
}

async fn cmd_send_data(ctl: &mut Controller, file: &Path, port: u16) -> Result<()> {
    let bytes = ctl
        .send_data_file(file, port)
        .await
        .with_context(|| format!("failed to send {}", file.display()))?;
    println!("Sent {} words to port {port:#x}", bytes / 4);
    Ok(())
}

struct ImageArgs<'a> {
    file: &'a Path,
    config: &'a Path,
    port: u16,
    ncols: u32,
    nrows: u32,
    nskips: u16,
    average_skips: bool,
    samples: Option<u16>,
    amplifier: &'a str,
    exposure: f64,
    read_time: f64,
    stall_timeout: Option<u64>,
}

async fn cmd_image(ctl: &mut Controller, args: ImageArgs<'_>) -> Result<()> {
    if args.file.exists() {
        bail!(
            "{} already exists, please specify a different name for the output",
            args.file.display()
        );
    }
    if args.nrows == 0 {
        bail!("--nrows must be positive");
    }

    let line = ctl
        .load_config(args.config)
        .with_context(|| format!("failed to read {}", args.config.display()))?;
    if line != 0 {
        eprintln!("Warning: {} line {line} could not be parsed", args.config.display());
    }
    if args.average_skips {
        ctl.config_mut().set_nskips(args.nskips)?;
        println!("Averaging over {} skips.", args.nskips);
    }
    if let Some(samples) = args.samples {
        ctl.config_mut().set_trigger_samples(samples)?;
    }

    ctl.send_config().await?;
    // The board needs a moment to drop its previous configuration.
    tokio::time::sleep(Duration::from_secs(1)).await;

    let npix = ctl.words_to_read(
        u64::from(args.nrows),
        u64::from(args.ncols),
        u64::from(args.nskips),
    )?;
    let fits_cols = u32::try_from(npix / u64::from(args.nrows)).context("image too wide")?;
    let id = ctl.launch_capture(args.file, args.port, args.nrows, fits_cols).await?;
    println!("Reading {npix} samples.");

    let mut read = 0;
    let mut last_change = tokio::time::Instant::now();
    while read < npix {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let now = ctl.words_read(id).unwrap_or(0);
        if now != read {
            last_change = tokio::time::Instant::now();
        }
        read = now;
        print_progress(read as f64 / npix as f64);

        if let Some(limit) = args.stall_timeout {
            if last_change.elapsed() > Duration::from_secs(limit) {
                println!();
                eprintln!("Readout stalled after {read} of {npix} words");
                break;
            }
        }
    }
    let read = ctl.close_capture(id).await?;

    let compile_time = match ctl.compile_time_string().await {
        Ok(t) => t,
        Err(e) => {
            tracing::warn!(error = %e, "Could not read firmware compile time");
            String::from("unknown")
        }
    };
    let info = ReadoutInfo {
        ndcms: args.nskips,
        amplifier: args.amplifier.to_string(),
        exposure_time: args.exposure,
        read_time: args.read_time,
        compile_time,
    };
    ctl.write_image_header(args.file, &info)
        .await
        .context("failed to write image header")?;

    println!();
    println!("Read a total of {read} words.");
    Ok(())
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut ctl = connect(&cli).await?;

    let result = match &cli.command {
        Command::Command {
            command,
            prefix,
            second,
            response,
            file,
        } => cmd_command(&mut ctl, command, *prefix, *second, *response, file.as_deref()).await,
        Command::Config {
            config,
            flash,
            page,
            write_default,
        } => cmd_config(&mut ctl, config, *flash, *page, *write_default).await,
        Command::Firmware {
            file,
            map,
            address,
            force,
        } => cmd_firmware(&mut ctl, file, map.as_deref(), *address, *force).await,
        Command::ReadEpcq { file, start, words } => cmd_read_epcq(&mut ctl, file, *start, *words).await,
        Command::Capture {
            port,
            file,
            rows,
            cols,
            duration,
        } => cmd_capture(&mut ctl, *port, file, *rows, *cols, *duration).await,
        Command::SendData { file, port } => cmd_send_data(&mut ctl, file, *port).await,
        Command::Image {
            file,
            config,
            port,
            ncols,
            nrows,
            nskips,
            average_skips,
            samples,
            amplifier,
            exposure,
            read_time,
            stall_timeout,
        } => {
            let args = ImageArgs {
                file,
                config,
                port: *port,
                ncols: *ncols,
                nrows: *nrows,
                nskips: *nskips,
                average_skips: *average_skips,
                samples: *samples,
                amplifier,
                exposure: *exposure,
                read_time: *read_time,
                stall_timeout: *stall_timeout,
            };
            cmd_image(&mut ctl, args).await
        }
    };

    ctl.shutdown().await.ok();
    result
}
