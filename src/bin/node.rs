use aircan::agent::CycleReport;
use aircan::protocol::{decode, DecodedMessage};
use aircan::simulation::{devices, SimWire, SimulationConfig};
use aircan::time::SystemClock;
use aircan::{AirQualityAgent, CanFrame, NodeConfig};
use clap::{App, Arg, ArgMatches};
use colored::*;
use std::time::Duration;
use tokio::time;
use tracing::{error, info};

const DEFAULT_TICK_MS: &str = "10";

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let matches = App::new("aircan-node")
        .version("0.1.0")
        .author("Environmental Sensing Team")
        .about("🌫️  Air-quality CAN node running against simulated sensors and bus")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("Node configuration (JSON); missing keys use defaults")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("interval")
                .short("i")
                .long("interval")
                .value_name("MS")
                .help("Cycle interval in milliseconds")
                .takes_value(true)
                .validator(is_number),
        )
        .arg(
            Arg::with_name("cycles")
                .short("n")
                .long("cycles")
                .value_name("COUNT")
                .help("Stop after this many cycles (default: run until Ctrl-C)")
                .takes_value(true)
                .validator(is_number),
        )
        .arg(
            Arg::with_name("tick")
                .long("tick")
                .value_name("MS")
                .help("Main loop polling period")
                .takes_value(true)
                .default_value(DEFAULT_TICK_MS)
                .validator(is_number),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Output format")
                .takes_value(true)
                .possible_values(&["text", "json"])
                .default_value("text"),
        )
        .arg(
            Arg::with_name("publish-gas")
                .long("publish-gas")
                .help("Also publish gas readings on the bus"),
        )
        .arg(
            Arg::with_name("require-particulate")
                .long("require-particulate")
                .help("Refuse to run without the particulate sensor"),
        )
        .arg(
            Arg::with_name("seed")
                .long("seed")
                .value_name("SEED")
                .help("Simulation random seed")
                .takes_value(true)
                .validator(is_number),
        )
        .arg(
            Arg::with_name("no-particulate")
                .long("no-particulate")
                .help("Simulate a missing particulate sensor"),
        )
        .arg(
            Arg::with_name("no-climate")
                .long("no-climate")
                .help("Simulate a missing climate sensor"),
        )
        .arg(
            Arg::with_name("gas-address")
                .long("gas-address")
                .value_name("ADDR")
                .help("Address the simulated gas sensor answers at (hex), or 'none'")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("no-bus")
                .long("no-bus")
                .help("Simulate a CAN controller that fails to start"),
        )
        .arg(rate_arg("pm-failure", "Particulate read failure rate (%)"))
        .arg(rate_arg("climate-failure", "Climate read failure rate (%)"))
        .arg(rate_arg("gas-failure", "Gas read failure rate (%)"))
        .arg(rate_arg("bus-busy", "Chance a frame finds the transmit queue full (%)"))
        .get_matches();

    let config = build_node_config(&matches)?;
    let simulation = build_simulation_config(&matches)?;
    let json = matches.value_of("format") == Some("json");
    let max_cycles = matches.value_of("cycles").map(str::parse::<u32>).transpose()?;
    let tick_ms = matches.value_of("tick").unwrap_or(DEFAULT_TICK_MS).parse::<u64>()?;

    if !json {
        println!("🌫️  Air-Quality CAN Node");
        println!("========================");
    }

    let wire = SimWire::new();
    let (particulate, climate, gas, bus) = devices(&simulation, wire.clone());
    let mut agent = match AirQualityAgent::boot(config, SystemClock::new(), particulate, climate, gas, bus) {
        Ok(agent) => agent,
        Err(e) => {
            error!("boot failed: {}", e);
            eprintln!("{} {}", "❌ Boot failed:".red().bold(), e);
            std::process::exit(1);
        }
    };

    if !json {
        print_boot(agent.boot_report());
    }

    let mut ticker = time::interval(Duration::from_millis(tick_ms.max(1)));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut cycles = 0u32;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Some(report) = agent.tick() {
                    let frames = wire.drain();
                    if json {
                        println!("{}", serde_json::to_string(&report)?);
                    } else {
                        print_cycle(&report, &frames);
                    }

                    cycles += 1;
                    if max_cycles.map_or(false, |max| cycles >= max) {
                        break;
                    }
                }
            }
            _ = &mut shutdown => {
                info!("shutdown requested");
                break;
            }
        }
    }

    let stats = agent.transmit_stats();
    let faults = agent.faults().counters();
    if json {
        println!(
            "{}",
            serde_json::json!({ "cycles": cycles, "transmit": stats, "faults": faults })
        );
    } else {
        println!();
        println!("{}", "Session summary".bold());
        println!("  Cycles:        {}", cycles);
        println!("  Frames sent:   {}", stats.frames_sent.to_string().green());
        println!("  Frames lost:   {}", colour_count(stats.frames_dropped()));
        println!(
            "  Faults:        init={} read={} bus={} transmit={}",
            faults.sensor_init, faults.sensor_read, faults.bus_init, faults.transmit
        );
        println!("🛑 Node stopped");
    }

    Ok(())
}

fn is_number(value: String) -> Result<(), String> {
    value.parse::<u64>().map(|_| ()).map_err(|_| "must be a non-negative integer".into())
}

fn rate_arg<'a>(name: &'a str, help: &'a str) -> Arg<'a, 'a> {
    Arg::with_name(name)
        .long(name)
        .value_name("PERCENT")
        .help(help)
        .takes_value(true)
        .validator(|v| match v.parse::<f32>() {
            Ok(rate) if (0.0..=100.0).contains(&rate) => Ok(()),
            _ => Err("rate must be between 0 and 100".into()),
        })
}

fn build_node_config(matches: &ArgMatches) -> Result<NodeConfig, Box<dyn std::error::Error>> {
    let mut config = match matches.value_of("config") {
        Some(path) => NodeConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => NodeConfig::default(),
    };

    if let Some(interval) = matches.value_of("interval") {
        config.interval_ms = interval.parse()?;
    }
    if matches.is_present("publish-gas") {
        config.publish_gas = true;
    }
    if matches.is_present("require-particulate") {
        config.require_particulate = true;
    }
    Ok(config)
}

fn build_simulation_config(matches: &ArgMatches) -> Result<SimulationConfig, Box<dyn std::error::Error>> {
    let mut simulation = SimulationConfig::default();

    if let Some(seed) = matches.value_of("seed") {
        simulation.seed = seed.parse()?;
    }
    simulation.particulate_present = !matches.is_present("no-particulate");
    simulation.climate_present = !matches.is_present("no-climate");
    simulation.bus_starts = !matches.is_present("no-bus");

    match matches.value_of("gas-address") {
        Some("none") => simulation.gas_address = None,
        Some(address) => {
            let address = address.trim_start_matches("0x");
            simulation.gas_address = Some(u8::from_str_radix(address, 16)?);
        }
        None => {}
    }

    let rate = |name: &str| -> Result<f32, Box<dyn std::error::Error>> {
        Ok(matches.value_of(name).map(str::parse::<f32>).transpose()?.unwrap_or(0.0))
    };
    simulation.particulate_failure_percent = rate("pm-failure")?;
    simulation.climate_failure_percent = rate("climate-failure")?;
    simulation.gas_failure_percent = rate("gas-failure")?;
    simulation.bus_busy_percent = rate("bus-busy")?;

    Ok(simulation)
}

fn online_label(online: bool) -> ColoredString {
    if online {
        "ONLINE".green()
    } else {
        "OFFLINE".red()
    }
}

fn colour_count(count: u32) -> ColoredString {
    if count == 0 {
        count.to_string().green()
    } else {
        count.to_string().yellow()
    }
}

fn print_boot(report: &aircan::agent::BootReport) {
    let address = |a: Option<u8>| a.map_or_else(|| "-".to_string(), |a| format!("{:#04x}", a));

    println!("{}", "Boot".bold());
    println!("  Particulate:   {}", online_label(report.online.particulate));
    println!("  Climate:       {} ({})", online_label(report.online.climate), address(report.climate_address));
    println!(
        "  Gas:           {} ({}, {} attempt(s))",
        online_label(report.online.gas),
        address(report.gas_address),
        report.gas_attempts
    );
    println!("  CAN bus:       {}", online_label(report.bus_running));
    println!();
}

fn print_cycle(report: &CycleReport, frames: &[CanFrame]) {
    println!("{} {}", format!("── cycle {}", report.cycle).cyan().bold(), format!("@ {} ms", report.timestamp_ms).dimmed());

    match &report.particulate {
        Some(pm) => println!(
            "  PM1.0 {:>4}  PM2.5 {:>4}  PM10 {:>4} µg/m³   AQI {} / {}",
            pm.pm1_env, pm.pm25_env, pm.pm10_env, pm.aqi_pm25_us, pm.aqi_pm10_us
        ),
        None => println!("  {}", "particulate: no reading".yellow()),
    }
    match &report.climate {
        Some(climate) => println!("  {:.2} °C  {:.2} %RH", climate.temperature_c, climate.humidity_rh),
        None => println!("  {}", "climate: no reading".yellow()),
    }
    match &report.gas {
        Some(gas) => println!(
            "  AQI-UBA {}  TVOC {} ppb  eCO2 {} ppm{}",
            gas.aqi_index,
            gas.tvoc_ppb,
            gas.eco2_ppm,
            if report.gas_compensated { "" } else { "  (uncompensated)" }
        ),
        None => println!("  {}", "gas: no reading".yellow()),
    }

    for frame in frames {
        let detail = match decode(frame) {
            Ok(DecodedMessage::Concentration { .. }) => "concentration",
            Ok(DecodedMessage::Aqi { .. }) => "aqi",
            Ok(DecodedMessage::Gas { .. }) => "gas",
            Err(_) => "unknown",
        };
        println!("  📡 {} {}", frame.to_text().as_str().green(), detail.dimmed());
    }
    if report.frames_dropped > 0 {
        println!("  {}", format!("{} frame(s) dropped", report.frames_dropped).red());
    }
}
