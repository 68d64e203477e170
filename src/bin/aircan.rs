use aircan::protocol::{decode, encode_aqi, encode_concentration, encode_gas, DecodedMessage};
use aircan::sensors::aqi::{pm10_aqi_us, pm25_aqi_us};
use aircan::sensors::particulate::decode_frame;
use aircan::{CanFrame, GasReading, MessageKind, ParticulateReading};
use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use colored::*;
use std::io::{self, BufRead};

fn main() {
    let matches = App::new("aircan")
        .version("0.1.0")
        .author("Environmental Sensing Team")
        .about("🌫️  Encode, decode and inspect air-quality CAN frames")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Output format")
                .takes_value(true)
                .possible_values(&["json", "table", "compact"])
                .default_value("table")
                .global(true),
        )
        .subcommand(
            SubCommand::with_name("decode")
                .about("📥 Decode frames in candump notation (e.g. 100#0005012C0019)")
                .long_about("Decodes each FRAME argument, or one frame per line from stdin when none are given")
                .arg(Arg::with_name("frame").value_name("FRAME").multiple(true)),
        )
        .subcommand(
            SubCommand::with_name("encode")
                .about("📤 Build the frames a node would publish for a reading")
                .arg(value_arg("pm1", "PM1.0 concentration (µg/m³)"))
                .arg(value_arg("pm25", "PM2.5 concentration (µg/m³)").required(true))
                .arg(value_arg("pm10", "PM10 concentration (µg/m³)").required(true))
                .arg(value_arg("aqi25", "PM2.5 AQI; derived from --pm25 when omitted"))
                .arg(value_arg("aqi10", "PM10 AQI; derived from --pm10 when omitted"))
                .arg(value_arg("gas-aqi", "Gas AQI index (1-5); adds a gas frame"))
                .arg(value_arg("tvoc", "TVOC (ppb) for the gas frame"))
                .arg(value_arg("eco2", "eCO2 (ppm) for the gas frame")),
        )
        .subcommand(
            SubCommand::with_name("aqi")
                .about("🧮 US-EPA AQI for particulate concentrations")
                .arg(value_arg("pm25", "PM2.5 concentration (µg/m³)"))
                .arg(value_arg("pm10", "PM10 concentration (µg/m³)")),
        )
        .subcommand(
            SubCommand::with_name("pms")
                .about("🔬 Decode a raw 32-byte particulate sensor frame given as hex")
                .arg(Arg::with_name("hex").value_name("HEX").required(true)),
        )
        .subcommand(SubCommand::with_name("ids").about("🆔 List the CAN identifiers in use"))
        .get_matches();

    let format = matches.value_of("format").unwrap_or("table");

    let result = match matches.subcommand() {
        ("decode", Some(sub)) => handle_decode(sub, format),
        ("encode", Some(sub)) => handle_encode(sub, format),
        ("aqi", Some(sub)) => handle_aqi(sub, format),
        ("pms", Some(sub)) => handle_pms(sub, format),
        ("ids", Some(_)) => handle_ids(format),
        _ => Ok(()),
    };

    if let Err(e) = result {
        eprintln!("{} {}", "❌ Error:".red().bold(), e);
        std::process::exit(1);
    }
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

fn value_arg<'a>(name: &'a str, help: &'a str) -> Arg<'a, 'a> {
    Arg::with_name(name)
        .long(name)
        .value_name("VALUE")
        .help(help)
        .takes_value(true)
        .validator(|v| v.parse::<u16>().map(|_| ()).map_err(|_| "must be an integer 0-65535".to_string()))
}

fn parse_value(matches: &ArgMatches, name: &str) -> Result<Option<u16>, std::num::ParseIntError> {
    matches.value_of(name).map(str::parse::<u16>).transpose()
}

fn handle_decode(matches: &ArgMatches, format: &str) -> CliResult {
    let frames: Vec<String> = match matches.values_of("frame") {
        Some(values) => values.map(str::to_owned).collect(),
        None => io::stdin().lock().lines().collect::<Result<_, _>>()?,
    };

    for text in frames.iter().filter(|line| !line.trim().is_empty()) {
        let decoded = CanFrame::parse(text).and_then(|frame| decode(&frame).map(|message| (frame, message)));
        match (decoded, format) {
            (Ok((_, message)), "json") => println!("{}", serde_json::to_string(&message)?),
            (Ok((frame, message)), "compact") => println!("{} {:?}", frame.to_text(), message),
            (Ok((frame, message)), _) => print_message(&frame, &message),
            (Err(e), "json") => println!("{}", serde_json::json!({ "frame": text.trim(), "error": e.to_string() })),
            (Err(e), _) => println!("{} {} {}", "⚠️".yellow(), text.trim(), e.to_string().yellow()),
        }
    }
    Ok(())
}

fn print_message(frame: &CanFrame, message: &DecodedMessage) {
    let kind = MessageKind::from_id(frame.id()).map_or_else(|| "unknown".to_string(), |k| k.to_string());
    println!("{} {}", frame.to_text().as_str().bright_cyan(), format!("({})", kind).dimmed());
    match message {
        DecodedMessage::Concentration { pm1_env, pm25_env, pm10_env } => {
            println!("  {} {} µg/m³", "PM1.0:".bright_white(), pm1_env);
            println!("  {} {} µg/m³", "PM2.5:".bright_white(), pm25_env);
            println!("  {} {} µg/m³", "PM10: ".bright_white(), pm10_env);
        }
        DecodedMessage::Aqi { aqi_pm25_us, aqi_pm10_us } => {
            println!("  {} {}", "AQI PM2.5:".bright_white(), aqi_colour(*aqi_pm25_us));
            println!("  {} {}", "AQI PM10: ".bright_white(), aqi_colour(*aqi_pm10_us));
        }
        DecodedMessage::Gas { aqi_index, tvoc_ppb, eco2_ppm } => {
            println!("  {} {}", "AQI-UBA:".bright_white(), aqi_index);
            println!("  {} {} ppb", "TVOC:   ".bright_white(), tvoc_ppb);
            println!("  {} {} ppm", "eCO2:   ".bright_white(), eco2_ppm);
        }
    }
}

fn aqi_colour(aqi: u16) -> ColoredString {
    let text = aqi.to_string();
    match aqi {
        0..=50 => text.bright_green(),
        51..=100 => text.yellow(),
        101..=150 => text.bright_yellow(),
        151..=200 => text.red(),
        201..=300 => text.magenta(),
        _ => text.bright_red().bold(),
    }
}

fn handle_encode(matches: &ArgMatches, format: &str) -> CliResult {
    let pm25 = parse_value(matches, "pm25")?.unwrap_or(0);
    let pm10 = parse_value(matches, "pm10")?.unwrap_or(0);

    let reading = ParticulateReading {
        pm1_env: parse_value(matches, "pm1")?.unwrap_or(0),
        pm25_env: pm25,
        pm10_env: pm10,
        aqi_pm25_us: parse_value(matches, "aqi25")?.unwrap_or_else(|| pm25_aqi_us(f32::from(pm25))),
        aqi_pm10_us: parse_value(matches, "aqi10")?.unwrap_or_else(|| pm10_aqi_us(f32::from(pm10))),
        ..ParticulateReading::default()
    };

    let mut frames = vec![
        CanFrame::new(MessageKind::Concentration.id(), &encode_concentration(&reading))?,
        CanFrame::new(MessageKind::Aqi.id(), &encode_aqi(&reading))?,
    ];

    if let Some(aqi_index) = parse_value(matches, "gas-aqi")? {
        let gas = GasReading {
            aqi_index,
            tvoc_ppb: parse_value(matches, "tvoc")?.unwrap_or(0),
            eco2_ppm: parse_value(matches, "eco2")?.unwrap_or(0),
        };
        frames.push(CanFrame::new(MessageKind::Gas.id(), &encode_gas(&gas))?);
    }

    match format {
        "json" => println!("{}", serde_json::to_string(&frames.iter().map(|f| f.to_text().to_string()).collect::<Vec<_>>())?),
        "compact" => {
            for frame in &frames {
                println!("{}", frame.to_text());
            }
        }
        _ => {
            for frame in &frames {
                let message = decode(frame)?;
                print_message(frame, &message);
            }
        }
    }
    Ok(())
}

fn handle_aqi(matches: &ArgMatches, format: &str) -> CliResult {
    let pm25 = parse_value(matches, "pm25")?;
    let pm10 = parse_value(matches, "pm10")?;
    if pm25.is_none() && pm10.is_none() {
        println!("{}", "Give --pm25 and/or --pm10.".yellow());
        return Ok(());
    }

    let aqi25 = pm25.map(|c| pm25_aqi_us(f32::from(c)));
    let aqi10 = pm10.map(|c| pm10_aqi_us(f32::from(c)));

    if format == "json" {
        println!("{}", serde_json::json!({ "aqi_pm25_us": aqi25, "aqi_pm10_us": aqi10 }));
        return Ok(());
    }
    if let (Some(c), Some(aqi)) = (pm25, aqi25) {
        println!("  {} {} µg/m³ → AQI {}", "PM2.5:".bright_white(), c, aqi_colour(aqi));
    }
    if let (Some(c), Some(aqi)) = (pm10, aqi10) {
        println!("  {} {} µg/m³ → AQI {}", "PM10: ".bright_white(), c, aqi_colour(aqi));
    }
    Ok(())
}

fn handle_pms(matches: &ArgMatches, format: &str) -> CliResult {
    let hex: String = matches
        .value_of("hex")
        .unwrap_or_default()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if !hex.is_ascii() || hex.len() != 64 {
        return Err(format!("expected 32 bytes (64 hex digits), got {} characters", hex.len()).into());
    }

    let mut frame = [0u8; 32];
    for (i, byte) in frame.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)?;
    }

    let reading = decode_frame(&frame)?;
    if format == "json" {
        println!("{}", serde_json::to_string(&reading)?);
        return Ok(());
    }

    println!("{}", "Particulate frame".bright_blue().bold());
    println!("  {} {} / {} / {} µg/m³", "Standard PM1.0/2.5/10:".bright_white(), reading.pm1_standard, reading.pm25_standard, reading.pm10_standard);
    println!("  {} {} / {} / {} µg/m³", "Ambient  PM1.0/2.5/10:".bright_white(), reading.pm1_env, reading.pm25_env, reading.pm10_env);
    println!(
        "  {} {} {} {} {} {} {}",
        "Particles/0.1L >0.3,0.5,1,2.5,5,10 µm:".bright_white(),
        reading.particles_03um,
        reading.particles_05um,
        reading.particles_10um,
        reading.particles_25um,
        reading.particles_50um,
        reading.particles_100um
    );
    println!(
        "  {} PM2.5 {}  PM10 {}",
        "AQI (US):".bright_white(),
        aqi_colour(reading.aqi_pm25_us),
        aqi_colour(reading.aqi_pm10_us)
    );
    Ok(())
}

fn handle_ids(format: &str) -> CliResult {
    if format == "json" {
        let ids: Vec<_> = MessageKind::ALL
            .iter()
            .map(|k| serde_json::json!({ "id": k.id().as_raw(), "message": k.to_string(), "dlc": k.payload_len() }))
            .collect();
        println!("{}", serde_json::to_string(&ids)?);
        return Ok(());
    }

    for kind in MessageKind::ALL {
        println!(
            "  {}  {} bytes  {}",
            format!("{:#05X}", kind.id().as_raw()).bright_cyan(),
            kind.payload_len(),
            kind
        );
    }
    Ok(())
}
