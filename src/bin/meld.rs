use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use log::{error, info};

use meld::{Config, Error, ErrorKind, GcMode, NodeId, Program, Result};
use meld::sched::Runtime;

#[derive(Parser)]
#[command(name = "meld", version, about = "Runs compiled Meld programs over a graph of nodes")]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Describe the types of a program
    Info {
        program: PathBuf,
        /// one type name per line, in type id order
        #[arg(long)]
        names: Option<PathBuf>,
        /// also disassemble every rule body
        #[arg(long)]
        code: bool,
    },
    /// Run a program to its fixpoint
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    program: PathBuf,
    #[arg(long)]
    names: Option<PathBuf>,
    /// `from to` pairs, one edge per line
    #[arg(long)]
    graph: Option<PathBuf>,
    /// nodes to create when there is no graph
    #[arg(long, default_value_t = 1)]
    nodes: usize,
    #[arg(long, default_value_t = 1)]
    threads: usize,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long, conflicts_with_all = ["gc_cycles", "no_gc"])]
    gc_threshold: Option<u64>,
    #[arg(long, conflicts_with = "no_gc")]
    gc_cycles: Option<u64>,
    #[arg(long)]
    no_gc: bool,
    /// print every node's facts afterwards
    #[arg(long)]
    dump: bool,
}

fn load(program: &Path, names: Option<&Path>) -> Result<Program> {
    let code = fs::read(program)?;
    let names : Vec<String> = match names {
        Some(p) => fs::read_to_string(p)?.lines()
                    .map(|l| l.trim().to_string())
                    .filter(|l| !l.is_empty())
                    .collect(),
        None => Vec::new()
    };
    Program::load(code, &names)
}

fn parse_graph(src: &str) -> Result<Vec<(NodeId, NodeId)>> {
    let mut edges = Vec::new();
    for (n, line) in src.lines().enumerate() {
        let line = match line.split_once('#') {
            Some((l, _)) => l,
            None => line
        }.trim();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.split_whitespace().map(|p| p.parse::<NodeId>());
        match (parts.next(), parts.next(), parts.next()) {
            (Some(Ok(from)), Some(Ok(to)), None) => edges.push((from, to)),
            _ => return Err(Error::with(ErrorKind::BadFormat,
                format!("graph line {}: expected `from to`", n + 1)))
        }
    }
    Ok(edges)
}

fn run(args: RunArgs) -> Result<()> {
    let prog = load(&args.program, args.names.as_deref())?;
    let gc = if args.no_gc {
        GcMode::Disabled
    } else if let Some(n) = args.gc_cycles {
        GcMode::Cycles(n)
    } else if let Some(n) = args.gc_threshold {
        GcMode::Allocations(n)
    } else {
        GcMode::default()
    };
    let mut config = Config::default().threads(args.threads).gc(gc);
    if let Some(seed) = args.seed {
        config = config.seed(seed);
    }

    let edges = match &args.graph {
        Some(p) => parse_graph(&fs::read_to_string(p)?)?,
        None => Vec::new()
    };
    let nodes = edges.iter()
        .map(|(a, b)| a.max(b) + 1)
        .max().unwrap_or(0)
        .max(args.nodes as NodeId);

    let mut rt = Runtime::new(prog, config);
    for _ in 0..nodes {
        rt.add_node();
    }
    for (from, to) in edges {
        rt.add_edge(from, to)?;
    }
    info!("{} nodes", nodes);
    let report = rt.run()?;
    println!("handled {} facts, {} collections", report.handled, report.collections);
    if args.dump {
        print!("{}", report.dump());
    }
    Ok(())
}

fn info(program: &Path, names: Option<&Path>, code: bool) -> Result<()> {
    let prog = load(program, names)?;
    print!("{}", prog.info());
    if code {
        for t in prog.types() {
            print!("{}", prog.disassemble(t.id));
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info")
    ).init();

    let cli = Cli::parse();
    let res = match cli.command {
        Cmd::Info { program, names, code } => info(&program, names.as_deref(), code),
        Cmd::Run(args) => run(args)
    };
    match res {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
