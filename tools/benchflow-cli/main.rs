use benchflow::bytecode::visualizer::visualize_definition;
use benchflow::prelude::*;
use benchflow::scpi::ScpiTransport;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Runs and inspects bench flow assets
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run an asset against a simulated instrument
    Run {
        /// Path to the asset (.json or bincode)
        asset_path: PathBuf,
        /// Optional runtime configuration JSON file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Index of the flow to start
        #[arg(short, long, default_value_t = 0)]
        flow: usize,
        /// Give up after this many ticks
        #[arg(short, long, default_value_t = 10_000)]
        ticks: usize,
        /// Simulated instrument latency per transaction, in milliseconds
        #[arg(long, default_value_t = 5)]
        latency_ms: u64,
    },
    /// Print a listing of every flow, component and property
    Disassemble {
        asset_path: PathBuf,
    },
    /// Convert an asset between JSON and bincode, chosen by the output extension
    Convert {
        input_path: PathBuf,
        output_path: PathBuf,
    },
    /// Write a small example asset that talks to the simulated instrument
    Sample {
        output_path: PathBuf,
    },
}

/// Prints flow log output and instrument traffic to the console.
struct ConsoleHooks;

impl RuntimeHooks for ConsoleHooks {
    fn on_log(&mut self, _instance: InstanceId, component: usize, entry: LogEntry) {
        match entry {
            LogEntry::Info(text) => println!("  [#{}] {}", component, text),
            LogEntry::ScpiCommand(text) => println!("  [#{}] >> {}", component, text),
            LogEntry::ScpiQuery(text) => println!("  [#{}] ?> {}", component, text),
            LogEntry::ScpiQueryResult(text) => println!("  [#{}] << {}", component, text),
        }
    }

    fn on_flow_error(&mut self, _instance: InstanceId, component: usize, message: &str) {
        eprintln!("  [#{}] error: {}", component, message);
    }
}

/// A stand-in instrument answering a handful of queries after a fixed delay.
struct SimulatedInstrument {
    latency: Duration,
    voltage: f32,
}

impl ScpiTransport for SimulatedInstrument {
    fn execute(&mut self, command: &str, kind: ScpiRequestKind) -> ScpiResponse {
        thread::sleep(self.latency);
        let command = command.trim();
        match kind {
            ScpiRequestKind::Command => {
                if let Some(value) = command.strip_prefix("VOLT ") {
                    match value.trim().parse::<f32>() {
                        Ok(volts) => self.voltage = volts,
                        Err(_) => return ScpiResponse::error(-224),
                    }
                }
                ScpiResponse::ok("")
            }
            ScpiRequestKind::Query => match command {
                "*IDN?" => ScpiResponse::ok("\"BENCHFLOW,SIMULATOR,0,1.0\""),
                "VOLT?" | "MEAS:VOLT?" => ScpiResponse::ok(format!("{}", self.voltage)),
                "MEAS:CURR?" => ScpiResponse::ok("0.125"),
                _ => ScpiResponse::error(-113),
            },
        }
    }
}

fn translate_error(code: i32) -> &'static str {
    match code {
        -113 => "Undefined header",
        -224 => "Illegal parameter value",
        _ => "Unknown error",
    }
}

struct SimulatorHooks {
    console: ConsoleHooks,
}

impl RuntimeHooks for SimulatorHooks {
    fn translate_scpi_error(&self, code: i32) -> String {
        translate_error(code).to_string()
    }

    fn on_log(&mut self, instance: InstanceId, component: usize, entry: LogEntry) {
        self.console.on_log(instance, component, entry);
    }

    fn on_flow_error(&mut self, instance: InstanceId, component: usize, message: &str) {
        self.console.on_flow_error(instance, component, message);
    }
}

fn main() {
    env_logger::Builder::from_default_env()
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            asset_path,
            config,
            flow,
            ticks,
            latency_ms,
        } => run_asset(asset_path, config, flow, ticks, latency_ms),
        Command::Disassemble { asset_path } => {
            let definition = load_asset(&asset_path);
            print!("{}", visualize_definition(&definition));
        }
        Command::Convert {
            input_path,
            output_path,
        } => {
            let definition = load_asset(&input_path);
            definition.save(&output_path).unwrap_or_else(|e| {
                exit_with_error(&format!(
                    "Failed to write '{}': {}",
                    output_path.display(),
                    e
                ))
            });
            println!(
                "Converted '{}' -> '{}'",
                input_path.display(),
                output_path.display()
            );
        }
        Command::Sample { output_path } => {
            sample_definition().save(&output_path).unwrap_or_else(|e| {
                exit_with_error(&format!(
                    "Failed to write '{}': {}",
                    output_path.display(),
                    e
                ))
            });
            println!("Sample asset written to '{}'", output_path.display());
        }
    }
}

fn run_asset(
    asset_path: PathBuf,
    config_path: Option<PathBuf>,
    flow: usize,
    max_ticks: usize,
    latency_ms: u64,
) {
    let total_start = Instant::now();

    // --- 1. Loading ---
    let load_start = Instant::now();
    let definition = load_asset(&asset_path);
    let config = match config_path {
        Some(path) => RuntimeConfig::from_file(&path).unwrap_or_else(|e| {
            exit_with_error(&format!(
                "Failed to load config '{}': {}",
                path.display(),
                e
            ))
        }),
        None => RuntimeConfig::default(),
    };
    let load_duration = load_start.elapsed();

    // --- 2. Runtime Setup ---
    let instrument = SimulatedInstrument {
        latency: Duration::from_millis(latency_ms),
        voltage: 0.0,
    };
    let worker = ScpiWorker::spawn(instrument, config.scpi_channel_capacity)
        .unwrap_or_else(|e| exit_with_error(&e.to_string()));
    let mut runtime = Runtime::builder(Arc::new(definition))
        .with_config(config)
        .with_hooks(SimulatorHooks {
            console: ConsoleHooks,
        })
        .with_scpi(worker)
        .build()
        .unwrap_or_else(|e| exit_with_error(&format!("Invalid asset: {}", e)));

    // --- 3. Execution ---
    println!("\nRunning flow {} of '{}'...", flow, asset_path.display());
    let run_start = Instant::now();
    runtime
        .start_flow(flow)
        .unwrap_or_else(|e| exit_with_error(&format!("Failed to start flow: {}", e)));

    let mut ticks = 0;
    let mut executed = 0;
    let mut longest_tick = Duration::ZERO;
    while ticks < max_ticks && !runtime.is_stopped() && !runtime.queue().is_empty() {
        let tick_start = Instant::now();
        let report = runtime.tick();
        longest_tick = longest_tick.max(tick_start.elapsed());
        executed += report.executed;
        ticks += 1;
        if report.executed == 0 {
            // Only suspended work is left; give the instrument thread time to answer.
            thread::sleep(Duration::from_millis(1));
        }
    }
    let run_duration = run_start.elapsed();

    // --- 4. Results and Summary ---
    match runtime.last_error() {
        Some(message) => println!("\nFlow stopped with error: {}", message),
        None if runtime.queue().is_empty() => println!("\nFlow finished."),
        None => println!("\nTick limit reached with {} tasks queued.", runtime.queue().len()),
    }

    println!("\n--- Performance Summary ---");
    println!("Asset Loading:        {:?}", load_duration);
    println!("Execution:            {:?}", run_duration);
    println!("Ticks:                {}", ticks);
    println!("Tasks Executed:       {}", executed);
    println!("Longest Tick:         {:?}", longest_tick);
    println!("-----------------------------");
    println!("Total:                {:?}", total_start.elapsed());
    println!();
}

fn load_asset(path: &Path) -> FlowDefinition {
    FlowDefinition::from_file(path).unwrap_or_else(|e| {
        exit_with_error(&format!("Failed to load asset '{}': {}", path.display(), e))
    })
}

/// Identifies the instrument, sets 5 V three times in a loop, then reads it back.
fn sample_definition() -> FlowDefinition {
    let mut definition = DefinitionBuilder::new();
    let five = definition.constant(5.0f32);
    let zero = definition.constant(0);
    let three = definition.constant(3);
    let one = definition.constant(1);
    let label = definition.constant("Measured voltage: ");

    let mut flow = FlowBuilder::new("sample");
    let idn_trigger = flow.seq_input();
    let loop_trigger = flow.seq_input();
    let set_trigger = flow.seq_input();
    let measure_trigger = flow.seq_input();
    let log_trigger = flow.seq_input();
    let end_trigger = flow.seq_input();
    let identity = flow.local(Literal::Null);
    let counter = flow.local(0);
    let voltage = flow.local(Literal::Null);

    let start = flow.component(Component::new(ComponentType::Start));
    let idn = flow.component(
        Component::new(ComponentType::Scpi)
            .with_inputs(&[idn_trigger])
            .with_payload(
                ScpiProgram::new()
                    .text("*IDN?")
                    .query_assign(Assembler::new().local(identity).finish())
                    .finish(),
            ),
    );
    let repeat = flow.component(
        Component::new(ComponentType::Loop)
            .with_inputs(&[loop_trigger])
            .with_property(Assembler::new().local(counter).finish())
            .with_property(Assembler::new().constant(zero).finish())
            .with_property(Assembler::new().constant(three).finish())
            .with_property(Assembler::new().constant(one).finish())
            .with_outputs(2),
    );
    let set = flow.component(
        Component::new(ComponentType::Scpi)
            .with_inputs(&[set_trigger])
            .with_payload(
                ScpiProgram::new()
                    .text("VOLT ")
                    .expr(Assembler::new().constant(five).finish())
                    .command()
                    .finish(),
            ),
    );
    let measure = flow.component(
        Component::new(ComponentType::Scpi)
            .with_inputs(&[measure_trigger])
            .with_payload(
                ScpiProgram::new()
                    .text("MEAS:VOLT?")
                    .query_assign(Assembler::new().local(voltage).finish())
                    .finish(),
            ),
    );
    let log = flow.component(
        Component::new(ComponentType::Log)
            .with_inputs(&[log_trigger])
            .with_property(
                Assembler::new()
                    .constant(label)
                    .local(voltage)
                    .op(Operation::Add)
                    .finish(),
            ),
    );
    let end = flow.component(Component::new(ComponentType::End).with_inputs(&[end_trigger]));

    flow.connect(start, SEQOUT, idn, idn_trigger)
        .connect(idn, SEQOUT, repeat, loop_trigger)
        .connect(repeat, SEQOUT, set, set_trigger)
        .connect(set, SEQOUT, repeat, loop_trigger)
        .connect(repeat, 1, measure, measure_trigger)
        .connect(measure, SEQOUT, log, log_trigger)
        .connect(log, SEQOUT, end, end_trigger);
    definition.flow(flow.build());
    definition.build()
}

fn exit_with_error(message: &str) -> ! {
    eprintln!("\nError: {}", message);
    std::process::exit(1);
}
