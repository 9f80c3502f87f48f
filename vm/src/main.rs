use clap::Parser as ClapParser;
use std::{process, thread};

use log::{LevelFilter, info, warn};
use object::{MethodHeader, ObjectRef, Value};

use vm::{
    ContextExecutor, ContextRef, ControlTransfer, Invocation, ReturnKind, SendOutcome, Vm,
    VmError, VmSettings, bootstrap,
};

const WORKER_PRIORITY: usize = 4;
const MAIN_PRIORITY: usize = 3;

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Worker processes blocking on the shared semaphore
    #[arg(long, default_value_t = 3)]
    workers: usize,

    /// Signals sent by the main process
    #[arg(long, default_value_t = 2)]
    signals: usize,

    /// Signals sent from a host thread through the signal inbox
    #[arg(long, default_value_t = 1)]
    external_signals: usize,

    /// Number of process priorities
    #[arg(long, default_value_t = 80)]
    priority_levels: usize,

    /// Log level (off, error, warn, info, debug, trace) unless RUST_LOG
    /// says otherwise
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Straight-line code: a sequence of sends, each laid out in the literal
/// frame as receiver, selector, argument count, arguments.
#[derive(Debug, Default, Clone)]
struct Script {
    literals: Vec<Value>,
}

impl Script {
    fn send(mut self, receiver: Value, selector: Value, args: &[Value]) -> Self {
        self.literals.push(receiver);
        self.literals.push(selector);
        self.literals.push(Value::from_i64(args.len() as i64));
        self.literals.extend_from_slice(args);
        self
    }

    fn compile(&self, vm: &mut Vm) -> Value {
        let header = MethodHeader {
            num_literals: u16::try_from(self.literals.len()).unwrap_or(u16::MAX),
            ..MethodHeader::default()
        };
        vm.new_method(header, self.literals.clone(), Vec::new(), Value::NIL)
    }
}

/// Runs [`Script`] methods. The pc indexes the literal frame.
#[derive(Debug, Default)]
struct ScriptExecutor {
    sends: usize,
}

impl ScriptExecutor {
    fn next_send(vm: &mut Vm, ctx: ContextRef) -> Result<Option<(Value, Value, Vec<Value>)>, VmError> {
        let context = vm.context(ctx)?;
        let Some(pc) = context.pc else {
            return Ok(None);
        };
        let method = context.method;
        let code = method.as_ref().ok_or(VmError::NoExecutableCode { method })?;
        let literals = &vm.memory.method(code)?.literals;
        let Some(&[receiver, selector, argc]) = literals.get(pc..pc + 3) else {
            return Ok(None);
        };
        let argc = argc.as_i64().unwrap_or(0) as usize;
        let args = literals
            .get(pc + 3..pc + 3 + argc)
            .ok_or(VmError::NoExecutableCode { method })?
            .to_vec();
        vm.context_mut(ctx)?.pc = Some(pc + 3 + argc);
        Ok(Some((receiver, selector, args)))
    }
}

impl ContextExecutor for ScriptExecutor {
    fn execute(&mut self, vm: &mut Vm, ctx: ContextRef) -> Result<ControlTransfer, VmError> {
        while let Some((receiver, selector, args)) = Self::next_send(vm, ctx)? {
            self.sends += 1;
            match vm.send(ctx, selector, receiver, &args)? {
                SendOutcome::Answered(value) => vm.push(ctx, value)?,
                SendOutcome::Switched(context) => {
                    return Ok(ControlTransfer::ProcessSwitch { context });
                }
                SendOutcome::Activated(callee) => match vm.invoke(self, callee)? {
                    Invocation::Returned(value) => vm.push(ctx, value)?,
                    Invocation::Transfer(transfer) => return Ok(transfer),
                },
            }
        }
        let result = vm.top(ctx).unwrap_or(Value::NIL);
        vm.return_value(ctx, result, ReturnKind::Local)
    }
}

fn main() {
    let cli = Cli::parse();

    let level = cli.log_level.parse().unwrap_or(LevelFilter::Info);
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    if cli.priority_levels < WORKER_PRIORITY {
        eprintln!(
            "Error: need at least {} priority levels, got {}",
            WORKER_PRIORITY, cli.priority_levels
        );
        process::exit(2);
    }

    let settings = VmSettings {
        priority_levels: cli.priority_levels,
        ..VmSettings::default()
    };
    if let Err(err) = run(&cli, settings) {
        eprintln!("Error: {}", err);
        process::exit(if err.is_fatal() { 70 } else { 1 });
    }
}

fn spawn_process(vm: &mut Vm, script: &Script, priority: usize) -> Result<ObjectRef, VmError> {
    let method = script.compile(vm);
    let ctx = vm.activate_method(None, method, Value::NIL, &[])?;
    let process = vm.new_process(ctx, priority)?;
    vm.put_to_sleep(process)?;
    Ok(process)
}

fn run(cli: &Cli, settings: VmSettings) -> Result<(), VmError> {
    let mut vm = bootstrap(settings)?;
    let shared = vm.new_semaphore()?;
    let done = vm.new_semaphore()?;
    let parked = vm.new_semaphore()?;
    let signal = vm.intern("signal");
    let wait = vm.intern("wait");
    let yield_selector = vm.intern("yield");
    let times = vm.intern("*");

    let worker = Script::default()
        .send(Value::from_ref(shared), wait, &[])
        .send(Value::from_ref(done), signal, &[])
        .send(Value::from_ref(parked), wait, &[]);
    for _ in 0..cli.workers {
        spawn_process(&mut vm, &worker, WORKER_PRIORITY)?;
    }

    let woken = cli.workers.min(cli.signals + cli.external_signals);
    let mut main = Script::default();
    for _ in 0..cli.signals {
        main = main.send(Value::from_ref(shared), signal, &[]);
    }
    for _ in 0..woken {
        main = main.send(Value::from_ref(done), wait, &[]);
    }
    main = main
        .send(Value::from_ref(vm.scheduler), yield_selector, &[])
        .send(Value::from_i64(woken as i64), times, &[Value::from_i64(1)]);
    spawn_process(&mut vm, &main, MAIN_PRIORITY)?;

    let inbox = vm.signals.clone();
    let external = cli.external_signals;
    let host = thread::spawn(move || {
        for _ in 0..external {
            inbox.signal(shared);
        }
    });
    if host.join().is_err() {
        warn!("external signal thread panicked");
    }

    info!(
        "{} workers, {} signals, {} external signals",
        cli.workers, cli.signals, cli.external_signals
    );
    let first = vm.wake_highest_priority(None)?;
    let mut executor = ScriptExecutor::default();
    let value = vm.run_top_level(&mut executor, first)?;

    let d = vm.diagnostics;
    println!("exit value: {:?}", value);
    println!("sends: {}", executor.sends);
    println!("process switches: {}", d.process_switches);
    println!("external signals: {}", d.external_signals);
    println!("materializations: {}", d.materializations);
    println!("broken sender chains: {}", d.broken_sender_chains);
    println!("off-chain returns: {}", d.off_chain_returns);
    println!("banked signals: {}", vm.excess_signals(shared)?);
    Ok(())
}
