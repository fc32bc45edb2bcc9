mod console;
mod listing;

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use acs_nls::Encoding;
use acs_script::{
    FunctionDescriptor, LoadOptions, Module, Scheduler, ScriptDescriptor, Session, VmConfig,
};
use console::ConsoleHost;
use listing::Disassembler;

#[derive(Debug, Serialize, Deserialize)]
pub struct StringTableEntry {
    language: String,
    strings: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModuleSummary {
    format: String,
    size: u32,
    sha256: String,
    scripts: Vec<ScriptDescriptor>,
    functions: Vec<FunctionDescriptor>,
    /// Length of every map array, by array index.
    arrays: Vec<usize>,
    /// Non-zero initial map variables as `(index, value)`.
    map_vars: Vec<(usize, i32)>,
    strings: Vec<StringTableEntry>,
}

impl ModuleSummary {
    pub fn new(module: &Module) -> Self {
        let fingerprint = module.fingerprint();
        let strings = module
            .strings()
            .languages()
            .filter_map(|lang| module.strings().table(lang))
            .map(|t| StringTableEntry {
                language: t.language().to_string(),
                strings: t.iter().map(str::to_owned).collect(),
            })
            .collect();
        Self {
            format: format!("{:?}", module.format()),
            size: fingerprint.len,
            sha256: fingerprint.sha256.iter().map(|b| format!("{:02x}", b)).collect(),
            scripts: module.scripts().to_vec(),
            functions: module.functions().to_vec(),
            arrays: module.map_arrays().iter().map(Vec::len).collect(),
            map_vars: nonzero(module.map_vars()),
            strings,
        }
    }
}

fn nonzero(values: &[i32]) -> Vec<(usize, i32)> {
    values.iter().copied().enumerate().filter(|&(_, v)| v != 0).collect()
}

#[derive(Debug, Serialize)]
struct InstanceRow {
    number: i32,
    state: String,
    pc: u32,
}

/// What a dry run leaves behind.
#[derive(Debug, Serialize)]
struct RunReport {
    tick: u64,
    instances: Vec<InstanceRow>,
    map_vars: Vec<(usize, i32)>,
}

impl RunReport {
    fn of(sched: &Scheduler) -> Self {
        Self {
            tick: sched.current_tick(),
            instances: sched
                .instances()
                .map(|i| InstanceRow {
                    number: i.number(),
                    state: format!("{:?}", i.state()),
                    pc: i.pc(),
                })
                .collect(),
            map_vars: nonzero(sched.module().map_vars()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AcsProject {
    module_file: PathBuf,
    disassembly_file: PathBuf,
}

fn write_project(module: &Module, output: &Path) -> Result<()> {
    if !output.exists() {
        std::fs::create_dir_all(output)?;
    }

    let bodies = Disassembler::new(module).disassemble();
    let writer = std::fs::File::create(output.join("disassembly.yaml"))?;
    serde_yaml::to_writer(writer, &bodies)?;

    let writer = std::fs::File::create(output.join("module.yaml"))?;
    serde_yaml::to_writer(writer, &ModuleSummary::new(module))?;

    let project = AcsProject {
        module_file: PathBuf::from("module.yaml"),
        disassembly_file: PathBuf::from("disassembly.yaml"),
    };
    let mut writer = std::fs::File::create(output.join("project.toml"))?;
    writer.write_all(toml::to_string_pretty(&project)?.as_bytes())?;

    log::info!("wrote {} bodies to {}", bodies.len(), output.display());
    Ok(())
}

fn print_listing(module: &Module, script: Option<i32>) -> Result<()> {
    let dis = Disassembler::new(module);
    let bodies = match script {
        Some(n) => match dis.script(n) {
            Some(body) => vec![body],
            None => bail!("script {} is not in the module", n),
        },
        None => dis.disassemble(),
    };
    let mut out = std::io::stdout().lock();
    for body in bodies {
        writeln!(
            out,
            "{:?} {} ({} args) @ 0x{:X}",
            body.kind, body.id, body.args_count, body.address
        )?;
        for inst in &body.insts {
            writeln!(out, "  {}", inst)?;
        }
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<VmConfig> {
    let Some(path) = path else {
        return Ok(VmConfig::from_env());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read config {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("bad config {}", path.display()))
}

struct RunArgs<'a> {
    map: i32,
    ticks: u64,
    seed: u32,
    busy_tags: &'a [i32],
    config: Option<&'a Path>,
    snapshot: Option<&'a Path>,
}

fn dry_run(module: Module, args: RunArgs<'_>) -> Result<()> {
    let config = load_config(args.config)?;
    let mut host = ConsoleHost::new(args.seed);
    host.busy_tags.extend(args.busy_tags.iter().copied());
    let mut session = Session::new();
    let mut sched = Scheduler::new(module, args.map, config);

    sched.begin_level(&mut session, &mut host);
    for _ in 0..args.ticks {
        sched.tick(&mut session, &mut host);
    }

    print!("{}", serde_yaml::to_string(&RunReport::of(&sched))?);
    log::info!("{} side effects over {} ticks", host.effects, args.ticks);

    if let Some(path) = args.snapshot {
        std::fs::write(path, sched.snapshot().to_bytes()?)
            .with_context(|| format!("cannot write snapshot {}", path.display()))?;
    }
    Ok(())
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write disassembly.yaml, module.yaml and project.toml to a directory
    Export {
        #[arg(short, long, required = true)]
        output: PathBuf,
    },
    /// Print a listing to stdout
    Disasm {
        #[arg(short, long)]
        script: Option<i32>,
    },
    /// Load the module as a level and run it for a number of ticks
    Run {
        #[arg(short, long, default_value_t = 1)]
        map: i32,
        #[arg(short, long, default_value_t = 35)]
        ticks: u64,
        #[arg(long, default_value_t = 1)]
        seed: u32,
        /// Sector tags that stay busy for the whole run
        #[arg(long = "busy-tag")]
        busy_tags: Vec<i32>,
        /// TOML file with VM settings; defaults come from the environment
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Write a level snapshot here after the last tick
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },
}

/// Inspect compiled ACS modules
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(short, long, required = true)]
    input: PathBuf,

    #[arg(short, long, default_value = "cp1252")]
    encoding: Encoding,

    #[command(subcommand)]
    command: Command,
}

fn main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));
    let args = Args::parse();

    let bytes = std::fs::read(&args.input)
        .with_context(|| format!("cannot read {}", args.input.display()))?;
    let module = Module::load(&bytes, &LoadOptions { encoding: args.encoding })
        .with_context(|| format!("cannot load {}", args.input.display()))?;

    match args.command {
        Command::Export { output } => write_project(&module, &output),
        Command::Disasm { script } => print_listing(&module, script),
        Command::Run { map, ticks, seed, busy_tags, config, snapshot } => dry_run(
            module,
            RunArgs {
                map,
                ticks,
                seed,
                busy_tags: &busy_tags,
                config: config.as_deref(),
                snapshot: snapshot.as_deref(),
            },
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acs_nls::LanguageId;
    use acs_script::format::{ModuleBuilder, ModuleFlavor};
    use acs_script::{Pcode, PcodeEncoding, ScriptType};
    use pretty_assertions::assert_eq;

    fn sample() -> Result<Module> {
        let mut b = ModuleBuilder::new(ModuleFlavor::Enhanced(PcodeEncoding::Compact));
        b.string("hello");
        b.localized_strings(LanguageId::ENGLISH, &["hi"]);
        b.map_array(0, &[1, 2], 4);
        b.map_var_init(3, &[7]);
        b.script(1, ScriptType::Open, 0).op(Pcode::Terminate);
        Ok(Module::load(&b.build(), &LoadOptions::default())?)
    }

    #[test]
    fn summary_lists_tables_and_initializers() -> Result<()> {
        let summary = ModuleSummary::new(&sample()?);
        assert_eq!(summary.format, "Enhanced(Compact)");
        assert_eq!(summary.arrays, vec![4]);
        assert_eq!(summary.map_vars, vec![(3, 7)]);
        assert_eq!(summary.strings.len(), 2);
        assert_eq!(summary.sha256.len(), 64);
        let yaml = serde_yaml::to_string(&summary)?;
        assert!(yaml.contains("hello"));
        Ok(())
    }

    #[test]
    fn config_file_overrides_defaults() -> Result<()> {
        let dir = std::env::temp_dir().join(format!("acs-dis-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir)?;
        let path = dir.join("vm.toml");
        std::fs::write(&path, "instruction_limit = 64\nlocale = \"fr\"\n")?;
        let config = load_config(Some(&path))?;
        assert_eq!(config.instruction_limit, 64);
        assert_eq!(config.locale, "fr".parse::<LanguageId>()?);
        assert_eq!(config.stack_capacity, VmConfig::default().stack_capacity);
        std::fs::remove_dir_all(&dir)?;
        Ok(())
    }

    #[test]
    fn export_writes_the_project_files() -> Result<()> {
        let dir = std::env::temp_dir().join(format!("acs-dis-export-{}", std::process::id()));
        write_project(&sample()?, &dir)?;
        let text = std::fs::read_to_string(dir.join("project.toml"))?;
        let project: AcsProject = toml::from_str(&text)?;
        assert_eq!(project.disassembly_file, PathBuf::from("disassembly.yaml"));
        assert!(dir.join("module.yaml").exists());
        std::fs::remove_dir_all(&dir)?;
        Ok(())
    }
}
