//! Offline command-line renderer: resolves commands, disassembles bytecode,
//! and exports WAV / MIDI / text views from a sound-program ROM image.

use soundrom_core::config::RenderConfig;
use soundrom_core::error::{Result, SoundRomError};
use soundrom_core::interpreter::{DEFAULT_MAX_SECONDS_MUSIC, DEFAULT_MAX_SECONDS_SFX};
use soundrom_core::resolver::{resolve_command, CommandInfo};
use soundrom_core::rom::Rom;
use soundrom_core::tables::MAX_COMMANDS;
use soundrom_core::{export, mixer};

#[cfg(feature = "disasm")]
use soundrom_core::disasm;
#[cfg(feature = "names")]
use soundrom_core::names::SoundNameTable;

use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
enum Action {
    List,
    Cmd(u8),
    Addr(u32),
    All,
    Range(u8, u8),
    Score(u8),
    Midi(u8),
    SpeechWav(u8),
    SpeechAll,
    SfxWav(u8),
    SfxAll,
    MusicWav(u8),
    MusicAll,
    RenderWav(u8),
    RenderAll,
}

struct Cli {
    rom_path: Option<String>,
    action: Option<Action>,
    out: Option<String>,
    out_dir: Option<String>,
    csv: Option<String>,
    config: Option<String>,
    sample_rate: Option<u32>,
    max_seconds: Option<f64>,
    midi_out: Option<String>,
}

const USAGE: &str = "\
Usage: soundrom-core <rom-file> <action> [options]

Actions:
  --list                 One-line summary of every command
  --cmd N                Resolved descriptor for command N
  --addr A                Disassemble bytecode starting at address A (accepts $hex or decimal)
  --all                  Resolved descriptor for every command
  --range A-B             Resolved descriptor for commands A..=B
  --score N               Columnar tracker view for command N
  --midi N                Export command N as a Standard MIDI File
  --speech-wav N | --speech-all    Render LPC speech command(s) to WAV
  --sfx-wav N    | --sfx-all       Render short SFX command(s) to WAV
  --music-wav N  | --music-all     Render long-form music command(s) to WAV
  --render-wav N | --render-all    Render any renderable command(s) to WAV

Options:
  --out FILE        Output path for a single-command action (default: derived name)
  --out-dir DIR      Output directory for a *-all action (default: \"out\")
  --midi-out FILE    Output path for --midi (default: derived name)
  --csv FILE         Sound-name table (default: auto-discovered soundcmds.csv)
  --config FILE      JSON render configuration
  --sample-rate HZ   Override the synthesis sample rate
  --max-seconds S    Override the interpreter's time cap
";

fn parse_number(s: &str) -> Option<u32> {
    if let Some(hex) = s.strip_prefix('$').or(s.strip_prefix("0x")) {
        u32::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}

fn parse_range(s: &str) -> Option<(u8, u8)> {
    let (a, b) = s.split_once('-')?;
    Some((parse_number(a)? as u8, parse_number(b)? as u8))
}

fn parse_args(mut args: impl Iterator<Item = String>) -> std::result::Result<Cli, String> {
    let mut cli = Cli {
        rom_path: None,
        action: None,
        out: None,
        out_dir: None,
        csv: None,
        config: None,
        sample_rate: None,
        max_seconds: None,
        midi_out: None,
    };

    let mut next_value = |flag: &str, args: &mut dyn Iterator<Item = String>| -> std::result::Result<String, String> {
        args.next()
            .ok_or_else(|| format!("{flag} requires an argument"))
    };

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--list" => cli.action = Some(Action::List),
            "--all" => cli.action = Some(Action::All),
            "--cmd" => {
                let v = next_value("--cmd", &mut args)?;
                let n = parse_number(&v).ok_or("--cmd expects a number")?;
                cli.action = Some(Action::Cmd(n as u8));
            }
            "--addr" => {
                let v = next_value("--addr", &mut args)?;
                let a = parse_number(&v).ok_or("--addr expects an address")?;
                cli.action = Some(Action::Addr(a));
            }
            "--range" => {
                let v = next_value("--range", &mut args)?;
                let (a, b) = parse_range(&v).ok_or("--range expects A-B")?;
                cli.action = Some(Action::Range(a, b));
            }
            "--score" => {
                let v = next_value("--score", &mut args)?;
                let n = parse_number(&v).ok_or("--score expects a number")?;
                cli.action = Some(Action::Score(n as u8));
            }
            "--midi" => {
                let v = next_value("--midi", &mut args)?;
                let n = parse_number(&v).ok_or("--midi expects a number")?;
                cli.action = Some(Action::Midi(n as u8));
            }
            "--speech-wav" => {
                let v = next_value("--speech-wav", &mut args)?;
                let n = parse_number(&v).ok_or("--speech-wav expects a number")?;
                cli.action = Some(Action::SpeechWav(n as u8));
            }
            "--speech-all" => cli.action = Some(Action::SpeechAll),
            "--sfx-wav" => {
                let v = next_value("--sfx-wav", &mut args)?;
                let n = parse_number(&v).ok_or("--sfx-wav expects a number")?;
                cli.action = Some(Action::SfxWav(n as u8));
            }
            "--sfx-all" => cli.action = Some(Action::SfxAll),
            "--music-wav" => {
                let v = next_value("--music-wav", &mut args)?;
                let n = parse_number(&v).ok_or("--music-wav expects a number")?;
                cli.action = Some(Action::MusicWav(n as u8));
            }
            "--music-all" => cli.action = Some(Action::MusicAll),
            "--render-wav" => {
                let v = next_value("--render-wav", &mut args)?;
                let n = parse_number(&v).ok_or("--render-wav expects a number")?;
                cli.action = Some(Action::RenderWav(n as u8));
            }
            "--render-all" => cli.action = Some(Action::RenderAll),
            "--out" => cli.out = Some(next_value("--out", &mut args)?),
            "--out-dir" => cli.out_dir = Some(next_value("--out-dir", &mut args)?),
            "--midi-out" => cli.midi_out = Some(next_value("--midi-out", &mut args)?),
            "--csv" => cli.csv = Some(next_value("--csv", &mut args)?),
            "--config" => cli.config = Some(next_value("--config", &mut args)?),
            "--sample-rate" => {
                let v = next_value("--sample-rate", &mut args)?;
                cli.sample_rate = Some(v.parse().map_err(|_| "--sample-rate expects a number")?);
            }
            "--max-seconds" => {
                let v = next_value("--max-seconds", &mut args)?;
                cli.max_seconds = Some(v.parse().map_err(|_| "--max-seconds expects a number")?);
            }
            "-h" | "--help" => return Err(USAGE.to_string()),
            _ if arg.starts_with('-') => return Err(format!("unknown flag: {arg}")),
            _ => cli.rom_path = Some(arg),
        }
    }

    Ok(cli)
}

#[cfg(feature = "names")]
fn load_names(cli: &Cli, rom_path: &str) -> Option<SoundNameTable> {
    if let Some(path) = &cli.csv {
        match SoundNameTable::load(path) {
            Ok(table) => Some(table),
            Err(e) => {
                log::warn!("failed to load sound-name table {path}: {e}");
                None
            }
        }
    } else {
        SoundNameTable::discover(rom_path)
    }
}

#[cfg(feature = "names")]
fn name_label(info: &CommandInfo, names: Option<&SoundNameTable>) -> String {
    names
        .and_then(|t| t.lookup(info.cmd))
        .map(|n| format!(" \"{}\" ({})", n.description, n.subsystem))
        .unwrap_or_default()
}

#[cfg(not(feature = "names"))]
fn name_label(_info: &CommandInfo) -> String {
    String::new()
}

fn describe(info: &CommandInfo, label: &str) -> String {
    format!(
        "cmd 0x{:02X}: type={} ({}) has_sequence={} is_speech={} channels={}{label}",
        info.cmd,
        info.handler_type,
        info.type_name(),
        info.has_sequence,
        info.is_speech,
        info.channels.len(),
    )
}

fn render_config(cli: &Cli) -> Result<RenderConfig> {
    let mut config = match &cli.config {
        Some(path) => RenderConfig::load(path)?,
        None => RenderConfig::default(),
    };
    if let Some(sr) = cli.sample_rate {
        config.sample_rate = sr;
    }
    if let Some(ms) = cli.max_seconds {
        config.max_seconds = Some(ms);
    }
    if let Some(csv) = &cli.csv {
        config.sound_names_csv = Some(csv.clone());
    }
    Ok(config)
}

fn write_wav_for(
    rom: &Rom,
    info: &CommandInfo,
    config: &RenderConfig,
    out_path: PathBuf,
) -> Result<()> {
    let output = mixer::render_command(rom, info, config)?;
    export::write_wav(&output, &out_path)?;
    log::info!("wrote {}", out_path.display());
    Ok(())
}

fn default_out(cli: &Cli, cmd: u8, ext: &str) -> PathBuf {
    if let Some(out) = &cli.out {
        return PathBuf::from(out);
    }
    PathBuf::from(format!("cmd_0x{cmd:02X}.{ext}"))
}

fn out_dir(cli: &Cli) -> PathBuf {
    PathBuf::from(cli.out_dir.as_deref().unwrap_or("out"))
}

fn batch_render(
    rom: &Rom,
    config: &RenderConfig,
    out_dir: &std::path::Path,
    ext: &str,
    max_seconds: Option<f64>,
    filter: impl Fn(&CommandInfo) -> bool,
) -> Result<usize> {
    std::fs::create_dir_all(out_dir)?;
    let mut count = 0usize;
    let mut cmd_config = config.clone();
    if let Some(ms) = max_seconds {
        if cmd_config.max_seconds.is_none() {
            cmd_config.max_seconds = Some(ms);
        }
    }
    for cmd in 0..MAX_COMMANDS as u8 {
        let Some(info) = resolve_command(rom, cmd)? else {
            continue;
        };
        if !info.has_sequence || !filter(&info) {
            continue;
        }
        let path = out_dir.join(format!("cmd_0x{cmd:02X}.{ext}"));
        match mixer::render_command(rom, &info, &cmd_config) {
            Ok(output) => {
                export::write_wav(&output, &path)?;
                log::info!("wrote {}", path.display());
                count += 1;
            }
            Err(e) => log::warn!("cmd 0x{cmd:02X} failed to render: {e}"),
        }
    }
    Ok(count)
}

fn run(cli: &Cli) -> Result<()> {
    let rom_path = cli
        .rom_path
        .as_ref()
        .ok_or_else(|| SoundRomError::Config("missing ROM file path".into()))?;
    let rom = Rom::load(rom_path)?;
    let config = render_config(cli)?;

    #[cfg(feature = "names")]
    let names = load_names(cli, rom_path);

    let action = cli
        .action
        .clone()
        .ok_or_else(|| SoundRomError::Config("no action specified (see --help)".into()))?;

    match action {
        Action::List => {
            for cmd in 0..MAX_COMMANDS as u8 {
                if let Some(info) = resolve_command(&rom, cmd)? {
                    #[cfg(feature = "names")]
                    let label = name_label(&info, names.as_ref());
                    #[cfg(not(feature = "names"))]
                    let label = name_label(&info);
                    println!("{}", describe(&info, &label));
                }
            }
        }
        Action::All => {
            for cmd in 0..MAX_COMMANDS as u8 {
                if let Some(info) = resolve_command(&rom, cmd)? {
                    #[cfg(feature = "names")]
                    let label = name_label(&info, names.as_ref());
                    #[cfg(not(feature = "names"))]
                    let label = name_label(&info);
                    println!("{}", describe(&info, &label));
                    for ch in &info.channels {
                        println!(
                            "  channel offset=0x{:02X} priority={} hw_channel=0x{:02X} seq_ptr=0x{:04X}",
                            ch.offset, ch.priority, ch.channel, ch.seq_ptr
                        );
                    }
                }
            }
        }
        Action::Cmd(cmd) => {
            let info = resolve_command(&rom, cmd)?
                .ok_or_else(|| SoundRomError::Config(format!("command 0x{cmd:02X} out of range")))?;
            #[cfg(feature = "names")]
            let label = name_label(&info, names.as_ref());
            #[cfg(not(feature = "names"))]
            let label = name_label(&info);
            println!("{}", describe(&info, &label));
            for ch in &info.channels {
                println!(
                    "  channel offset=0x{:02X} priority={} hw_channel=0x{:02X} seq_ptr=0x{:04X}",
                    ch.offset, ch.priority, ch.channel, ch.seq_ptr
                );
            }
        }
        Action::Range(a, b) => {
            for cmd in a..=b {
                if let Some(info) = resolve_command(&rom, cmd)? {
                    #[cfg(feature = "names")]
                    let label = name_label(&info, names.as_ref());
                    #[cfg(not(feature = "names"))]
                    let label = name_label(&info);
                    println!("{}", describe(&info, &label));
                }
            }
        }
        #[cfg(feature = "disasm")]
        Action::Addr(addr) => {
            print!("{}", disasm::disassemble(&rom, addr)?);
        }
        #[cfg(not(feature = "disasm"))]
        Action::Addr(_) => {
            return Err(SoundRomError::Config(
                "--addr requires the \"disasm\" feature".into(),
            ));
        }
        #[cfg(feature = "disasm")]
        Action::Score(cmd) => {
            let info = resolve_command(&rom, cmd)?
                .ok_or_else(|| SoundRomError::Config(format!("command 0x{cmd:02X} out of range")))?;
            print!("{}", disasm::score(&rom, &info));
        }
        #[cfg(not(feature = "disasm"))]
        Action::Score(_) => {
            return Err(SoundRomError::Config(
                "--score requires the \"disasm\" feature".into(),
            ));
        }
        #[cfg(feature = "midi")]
        Action::Midi(cmd) => {
            let info = resolve_command(&rom, cmd)?
                .ok_or_else(|| SoundRomError::Config(format!("command 0x{cmd:02X} out of range")))?;
            let path = cli
                .midi_out
                .clone()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(format!("cmd_0x{cmd:02X}.mid")));
            export::write_midi(&rom, &info, &path)?;
            log::info!("wrote {}", path.display());
        }
        #[cfg(not(feature = "midi"))]
        Action::Midi(_) => {
            return Err(SoundRomError::Config(
                "--midi requires the \"midi\" feature".into(),
            ));
        }
        Action::SpeechWav(cmd) => {
            let info = resolve_command(&rom, cmd)?
                .ok_or_else(|| SoundRomError::Config(format!("command 0x{cmd:02X} out of range")))?;
            if !info.is_speech {
                return Err(SoundRomError::Config(format!(
                    "command 0x{cmd:02X} is not a speech command"
                )));
            }
            write_wav_for(&rom, &info, &config, default_out(cli, cmd, "wav"))?;
        }
        Action::SpeechAll => {
            let n = batch_render(&rom, &config, &out_dir(cli), "wav", None, |i| i.is_speech)?;
            println!("rendered {n} speech command(s)");
        }
        Action::SfxWav(cmd) => {
            let info = resolve_command(&rom, cmd)?
                .ok_or_else(|| SoundRomError::Config(format!("command 0x{cmd:02X} out of range")))?;
            if info.is_speech || !info.has_sequence {
                return Err(SoundRomError::Config(format!(
                    "command 0x{cmd:02X} is not an SFX command"
                )));
            }
            let mut cfg = config.clone();
            if cfg.max_seconds.is_none() {
                cfg.max_seconds = Some(DEFAULT_MAX_SECONDS_SFX);
            }
            write_wav_for(&rom, &info, &cfg, default_out(cli, cmd, "wav"))?;
        }
        Action::SfxAll => {
            let n = batch_render(
                &rom,
                &config,
                &out_dir(cli),
                "wav",
                Some(DEFAULT_MAX_SECONDS_SFX),
                |i| !i.is_speech,
            )?;
            println!("rendered {n} SFX command(s)");
        }
        Action::MusicWav(cmd) => {
            let info = resolve_command(&rom, cmd)?
                .ok_or_else(|| SoundRomError::Config(format!("command 0x{cmd:02X} out of range")))?;
            if info.is_speech || !info.has_sequence {
                return Err(SoundRomError::Config(format!(
                    "command 0x{cmd:02X} is not a music command"
                )));
            }
            let mut cfg = config.clone();
            if cfg.max_seconds.is_none() {
                cfg.max_seconds = Some(DEFAULT_MAX_SECONDS_MUSIC);
            }
            write_wav_for(&rom, &info, &cfg, default_out(cli, cmd, "wav"))?;
        }
        Action::MusicAll => {
            let n = batch_render(
                &rom,
                &config,
                &out_dir(cli),
                "wav",
                Some(DEFAULT_MAX_SECONDS_MUSIC),
                |i| !i.is_speech,
            )?;
            println!("rendered {n} music command(s)");
        }
        Action::RenderWav(cmd) => {
            let info = resolve_command(&rom, cmd)?
                .ok_or_else(|| SoundRomError::Config(format!("command 0x{cmd:02X} out of range")))?;
            if !info.has_sequence {
                return Err(SoundRomError::Config(format!(
                    "command 0x{cmd:02X} has no renderable sequence"
                )));
            }
            write_wav_for(&rom, &info, &config, default_out(cli, cmd, "wav"))?;
        }
        Action::RenderAll => {
            let n = batch_render(&rom, &config, &out_dir(cli), "wav", None, |_| true)?;
            println!("rendered {n} command(s)");
        }
    }

    Ok(())
}

fn main() {
    env_logger::init();

    let cli = match parse_args(env::args().skip(1)) {
        Ok(cli) => cli,
        Err(msg) => {
            eprintln!("{msg}");
            std::process::exit(1);
        }
    };

    if cli.rom_path.is_none() || cli.action.is_none() {
        eprint!("{USAGE}");
        std::process::exit(1);
    }

    if let Err(e) = run(&cli) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
