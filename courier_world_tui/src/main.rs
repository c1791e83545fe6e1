use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use courier_world_core::{
    Agent, EnvConfig, Environment, GreedyAgent, PackageMode, PlanningAgent, PolicyFile,
    RandomWalker, RunConfig, SharedQLearner, persist, playback::solo_episode,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod ui;

#[derive(Parser, Debug)]
#[command(version, about = "Multi-agent package delivery with shared Q-learning", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train one Q-table per agent and save them.
    Train(TrainArgs),
    /// Watch agents deliver packages in the terminal.
    Play(PlayArgs),
}

#[derive(clap::Args, Debug)]
struct TrainArgs {
    /// JSON run configuration; flags below override its values
    #[arg(short, long, value_name = "CONFIG_FILE")]
    config: Option<PathBuf>,
    #[arg(long)]
    episodes: Option<usize>,
    #[arg(long)]
    agents: Option<usize>,
    #[arg(long)]
    grid_size: Option<usize>,
    #[arg(long)]
    obstacles: Option<usize>,
    /// Give every agent its own package instead of one shared package
    #[arg(long)]
    per_agent_packages: bool,
    #[arg(long)]
    gamma: Option<f64>,
    #[arg(long)]
    epsilon: Option<f64>,
    #[arg(long)]
    decay_rate: Option<f64>,
    #[arg(long)]
    epsilon_floor: Option<f64>,
    #[arg(long)]
    initial_q: Option<f64>,
    #[arg(long)]
    seed: Option<u64>,
    /// Where to write the learned tables
    #[arg(short, long, default_value = "policy.json")]
    output: PathBuf,
    /// Where to write the sampled reward history
    #[arg(long, value_name = "FILE")]
    rewards: Option<PathBuf>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Behaviour {
    /// Follow the saved Q-tables greedily
    Greedy,
    /// Walk to the package and then the goal along shortest paths
    Planner,
    /// Act uniformly at random
    Random,
}

#[derive(clap::Args, Debug)]
struct PlayArgs {
    /// Policy file written by `train`
    #[arg(short, long, value_name = "POLICY_FILE")]
    policy: Option<PathBuf>,
    #[arg(short, long, value_enum, default_value_t = Behaviour::Greedy)]
    behaviour: Behaviour,
    /// Environment used when no policy is given
    #[arg(long, default_value_t = 3)]
    agents: usize,
    #[arg(long, default_value_t = 5)]
    grid_size: usize,
    #[arg(long, default_value_t = 1)]
    obstacles: usize,
    /// Seed for layouts and random walkers
    #[arg(long, default_value_t = 0)]
    seed: u64,
    /// Milliseconds between turns
    #[arg(long, default_value_t = 250)]
    tick_ms: u64,
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();
    match args.command {
        Command::Train(train_args) => {
            init_tracing();
            train(train_args)
        }
        // The terminal UI owns stdout and stderr while it runs.
        Command::Play(play_args) => play(play_args),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_run_config(path: Option<&Path>) -> Result<RunConfig> {
    let Some(path) = path else {
        return Ok(RunConfig::default());
    };
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    RunConfig::from_json(&text).with_context(|| format!("Invalid config file {}", path.display()))
}

fn resolve_run_config(args: &TrainArgs) -> Result<RunConfig> {
    let mut run = load_run_config(args.config.as_deref())?;
    let env = &mut run.env;
    let learner = &mut run.learner;

    if let Some(agents) = args.agents {
        env.num_agents = agents;
    }
    if let Some(grid_size) = args.grid_size {
        env.grid_size = grid_size;
    }
    if let Some(obstacles) = args.obstacles {
        env.num_obstacles = obstacles;
    }
    if args.per_agent_packages {
        env.package_mode = PackageMode::PerAgent;
    }
    if let Some(episodes) = args.episodes {
        learner.num_episodes = episodes;
    }
    if let Some(gamma) = args.gamma {
        learner.gamma = gamma;
    }
    if let Some(epsilon) = args.epsilon {
        learner.epsilon = epsilon;
    }
    if let Some(decay_rate) = args.decay_rate {
        learner.decay_rate = decay_rate;
    }
    if let Some(epsilon_floor) = args.epsilon_floor {
        learner.epsilon_floor = epsilon_floor;
    }
    if let Some(initial_q) = args.initial_q {
        learner.initial_q = initial_q;
    }
    if let Some(seed) = args.seed {
        learner.seed = seed;
    }

    run.validate()?;
    Ok(run)
}

fn train(args: TrainArgs) -> Result<()> {
    let run = resolve_run_config(&args)?;
    let resolved = serde_json::to_string(&run)?;
    info!(config = %resolved, "resolved run configuration");

    let mut learner = SharedQLearner::new(run.env.clone(), run.learner.clone())?;
    learner.train()?;

    if let Some(path) = &args.rewards {
        persist::write_history(path, learner.history())
            .with_context(|| format!("Failed to write rewards to {}", path.display()))?;
        info!(path = %path.display(), "reward history written");
    }

    // Greedy evaluation of every agent alone in a fresh episode.
    let mut env = Environment::new(run.env.clone(), run.learner.seed)?;
    let max_steps = run.env.fuel_budget() as usize;
    for (id, table) in learner.tables().into_iter().enumerate() {
        let mut greedy = GreedyAgent::new(id, table);
        let report = solo_episode(&mut env, id, &mut greedy, max_steps)?;
        println!(
            "agent {id}: {} in {} steps, reward {:.1}",
            if report.delivered() { "delivered" } else { "not delivered" },
            report.steps,
            report.total_reward
        );
    }

    PolicyFile::new(run.env, learner.into_tables())
        .write_to_file(&args.output)
        .with_context(|| format!("Failed to write policy to {}", args.output.display()))?;
    println!("policy saved to {}", args.output.display());
    Ok(())
}

fn build_agents(behaviour: Behaviour, policy: Option<PolicyFile>, env: &EnvConfig, seed: u64) -> Result<Vec<Box<dyn Agent>>> {
    let agents: Vec<Box<dyn Agent>> = match (behaviour, policy) {
        (Behaviour::Greedy, Some(policy)) => policy
            .tables
            .into_iter()
            .enumerate()
            .map(|(id, table)| Box::new(GreedyAgent::new(id, table)) as Box<dyn Agent>)
            .collect(),
        (Behaviour::Greedy, None) => bail!("--behaviour greedy needs a --policy file"),
        (Behaviour::Planner, _) => (0..env.num_agents)
            .map(|id| Box::new(PlanningAgent::new(id)) as Box<dyn Agent>)
            .collect(),
        (Behaviour::Random, _) => (0..env.num_agents)
            .map(|id| Box::new(RandomWalker::new(id, seed.wrapping_add(id as u64))) as Box<dyn Agent>)
            .collect(),
    };
    Ok(agents)
}

fn play(args: PlayArgs) -> Result<()> {
    let policy = args
        .policy
        .as_deref()
        .map(|path| {
            PolicyFile::read_from_file(path)
                .with_context(|| format!("Failed to load policy {}", path.display()))
        })
        .transpose()?;

    let env_config = match &policy {
        Some(policy) => policy.env.clone(),
        None => EnvConfig::new(args.agents, args.grid_size, args.obstacles),
    };
    let environment = Environment::new(env_config.clone(), args.seed)?;
    let agents = build_agents(args.behaviour, policy, &env_config, args.seed)?;
    let mut app = ui::App::new(environment, agents)?;

    // Set up the terminal
    let mut terminal = ui::setup_terminal()?;
    let result = ui::run_app(&mut terminal, &mut app, args.tick_ms);
    // Restore the terminal state even if the loop failed
    ui::restore_terminal(&mut terminal)?;
    result
}
