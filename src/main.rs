//! ninalink - frame tooling and emulator demo for the SPI WiFi driver.

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use ninalink_net::{Config, Network, TcpClient, WifiDriver};
use ninalink_protocol::{Command, Frame};
use ninalink_sim::{SimDevice, SimNetwork};
use ninalink_spi::{LinkConfig, Signals, SpiDriver};
use serde_json::json;
use std::io::{Read, Write};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ninalink")]
#[command(about = "Frame tooling for the WiFi co-processor SPI protocol")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode a command frame and print it as hex
    Encode {
        /// Command name (e.g. START_CLIENT_TCP_CMD) or opcode (e.g. 0x2d)
        command: String,

        /// Parameters: hex bytes, or u8:N, u16:N, u32:N, ip:A.B.C.D, str:TEXT
        params: Vec<String>,

        /// Encode as the device's reply instead of a host command
        #[arg(short, long)]
        reply: bool,
    },

    /// Decode a hex frame
    Decode {
        /// Frame bytes as hex; whitespace is ignored
        frame: String,

        /// Decode as a device reply
        #[arg(short, long)]
        reply: bool,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Run a scripted session against the in-memory co-processor
    Demo {
        /// Network the emulator advertises and the demo joins
        #[arg(long, default_value = "demo-net")]
        ssid: String,

        /// Passphrase for the network; open network if omitted
        #[arg(long)]
        passphrase: Option<String>,

        /// Message echoed through a TCP socket
        #[arg(short, long, default_value = "hello over spi")]
        message: String,
    },

    /// Print the effective configuration
    Config {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = ConfigFormat::Yaml)]
        format: ConfigFormat,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ConfigFormat {
    Yaml,
    Json,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Encode {
            command,
            params,
            reply,
        } => encode(&command, &params, reply),
        Commands::Decode { frame, reply, json } => decode(&frame, reply, json),
        Commands::Demo {
            ssid,
            passphrase,
            message,
        } => demo(&ssid, passphrase.as_deref(), &message),
        Commands::Config { format } => show_config(format),
    };

    if let Err(e) = result {
        eprintln!("{}: {}", "Error".red(), e);
        std::process::exit(1);
    }
}

fn load_config() -> Config {
    match Config::load() {
        Ok(c) => {
            if let Ok(path) = std::env::var("NINALINK_CONFIG") {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            tracing::warn!("Failed to load config: {}, using defaults", e);
            Config::default()
        }
    }
}

fn lookup_command(name: &str) -> Result<Command, String> {
    if let Some(digits) = name.strip_prefix("0x").or_else(|| name.strip_prefix("0X")) {
        let opcode =
            u8::from_str_radix(digits, 16).map_err(|e| format!("bad opcode '{}': {}", name, e))?;
        return Command::from_opcode(opcode).ok_or_else(|| format!("unknown opcode {}", name));
    }
    Command::from_name(name).ok_or_else(|| format!("unknown command '{}'", name))
}

fn parse_param(arg: &str) -> Result<Vec<u8>, String> {
    let bad = |e: &dyn std::fmt::Display| format!("bad parameter '{}': {}", arg, e);

    let Some((kind, value)) = arg.split_once(':') else {
        return parse_hex(arg);
    };
    match kind {
        "u8" => value
            .parse::<u8>()
            .map(|v| vec![v])
            .map_err(|e| bad(&e)),
        "u16" => value
            .parse::<u16>()
            .map(|v| v.to_be_bytes().to_vec())
            .map_err(|e| bad(&e)),
        "u32" => value
            .parse::<u32>()
            .map(|v| v.to_be_bytes().to_vec())
            .map_err(|e| bad(&e)),
        "ip" => value
            .parse::<Ipv4Addr>()
            .map(|ip| ip.octets().to_vec())
            .map_err(|e| bad(&e)),
        "str" => Ok(value.as_bytes().to_vec()),
        other => Err(format!("unknown parameter type '{}'", other)),
    }
}

fn parse_hex(text: &str) -> Result<Vec<u8>, String> {
    let digits: String = text
        .trim_start_matches("0x")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    hex::decode(&digits).map_err(|e| format!("bad hex '{}': {}", text, e))
}

fn encode(name: &str, params: &[String], reply: bool) -> Result<(), Box<dyn std::error::Error>> {
    let command = lookup_command(name)?;
    let mut frame = if reply {
        Frame::reply(command)
    } else {
        Frame::command(command)
    };
    for param in params {
        frame.push_param(parse_param(param)?);
    }

    let bytes = frame.encode()?;
    let kind = if reply { "Reply" } else { "Command" };
    eprintln!(
        "{} {} ({} params, {} bytes)",
        kind.green(),
        command.to_string().cyan(),
        frame.params().len(),
        bytes.len()
    );
    println!("{}", hex::encode(&bytes));
    Ok(())
}

fn decode(text: &str, reply: bool, as_json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = parse_hex(text)?;
    let frame = if reply {
        Frame::decode_reply(&bytes)?
    } else {
        Frame::decode_command(&bytes)?
    };
    let name = frame.command_kind().map(Command::name).unwrap_or("UNKNOWN");

    if as_json {
        let value = json!({
            "opcode": frame.opcode(),
            "command": name,
            "reply": frame.is_reply(),
            "width": frame.width().name(),
            "params": frame.params().iter().map(hex::encode).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    let kind = if frame.is_reply() { "reply" } else { "command" };
    println!(
        "{} {} {:#04x} ({}, {} params)",
        kind.bold(),
        name.cyan(),
        frame.opcode(),
        frame.width().name(),
        frame.params().len()
    );
    for (index, param) in frame.params().iter().enumerate() {
        println!(
            "  {} [{}] {}",
            format!("#{}", index).dimmed(),
            param.len(),
            hex::encode(param)
        );
    }
    if frame.command_kind().is_none() {
        println!("{}", "unknown opcode, lengths read as narrow".yellow());
    }
    Ok(())
}

fn demo(ssid: &str, passphrase: Option<&str>, message: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config();
    let poll = Duration::from_millis(10);

    let signals = Signals::new();
    let (device, sim) = SimDevice::new(&signals);
    let spi = Arc::new(SpiDriver::new(device, signals, LinkConfig::instant()));
    let wifi = WifiDriver::new(Arc::clone(&spi), config.wifi.with_poll_interval(poll));
    let net = Arc::new(Network::new(
        Arc::clone(&spi),
        config.sockets.with_poll_interval(poll),
    ));

    let network = match passphrase {
        Some(secret) => SimNetwork::secured(ssid, secret),
        None => SimNetwork::open(ssid),
    };
    sim.add_network(network.with_rssi(-48));
    sim.add_network(SimNetwork::open("neighbour").with_rssi(-80).with_channel(11));
    sim.add_host("echo.local", Ipv4Addr::new(192, 168, 1, 10));
    sim.set_echo(true);

    println!("{} {}", "Firmware".bold(), wifi.firmware_version()?);

    let found = wifi.scan_networks();
    println!("{} {} networks", "Scan".bold(), found);
    for entry in wifi.scan_entries()? {
        println!(
            "  {:<16} {:>4} dBm  ch {:<2} {:?}",
            entry.ssid.cyan(),
            entry.rssi,
            entry.channel,
            entry.encryption
        );
    }

    let status = match passphrase {
        Some(secret) => wifi.begin_with_passphrase(ssid, secret)?,
        None => wifi.begin(ssid)?,
    };
    println!("{} {} -> {:?}", "Join".bold(), ssid.cyan(), status);
    println!(
        "  ip {}  mac {}",
        wifi.local_ip()?,
        ninalink_net::wifi::format_mac(&wifi.mac_address()?)
    );

    let mut client = TcpClient::new(Arc::clone(&net));
    client.connect_host("echo.local", 7)?;
    println!(
        "{} socket {} to {:?}",
        "Connected".green(),
        client.socket().raw(),
        client.remote_ip()
    );

    client.write_all(message.as_bytes())?;
    let mut echoed = vec![0u8; message.len()];
    client.read_exact(&mut echoed)?;
    println!("{} {}", "Echo".bold(), String::from_utf8_lossy(&echoed));

    client.stop()?;
    println!(
        "{} {} commands, {} resets",
        "Done".green(),
        Command::all()
            .iter()
            .map(|c| sim.command_count(*c))
            .sum::<usize>(),
        sim.reset_count()
    );
    Ok(())
}

fn show_config(format: ConfigFormat) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config();
    match format {
        ConfigFormat::Yaml => print!("{}", serde_yaml::to_string(&config)?),
        ConfigFormat::Json => println!("{}", serde_json::to_string_pretty(&config)?),
    }
    Ok(())
}
