//! The command executor: owns the mailbox, the dispatch table, and the
//! shared handles every scripted command needs. One worker thread drains
//! the mailbox and runs handlers to completion (or to the `abort_requested`
//! checkpoint that interrupts them).

use crate::error::ExecError;
use crate::latch::EdgeLatch;
use crate::mailbox::Mailbox;
use crate::phase::Phase;
use crate::status;
use md2_events::EventBus;
use md2_kv::KvHandle;
use md2_link::PmacLink;
use md2_model::registry::{BinaryInputTable, MotorTable};
use md2_model::{Motor, MotorKind, OmegaZeroSearch};
use md2_motion::{MotionOrchestrator, MoveSpec};
use md2_sql::{QueryResult, SqlError, SqlGateway};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

type Handler = fn(&Executor, &[&str]) -> Result<(), ExecError>;

/// Motors used by the fixed choreographies, named by convention rather than
/// loaded from config — there is exactly one of each on an MD2.
pub const ALIGN_AXES: [&str; 3] = ["alignx", "aligny", "alignz"];
pub const CENTER_AXES: [&str; 2] = ["centerx", "centery"];

pub struct Executor {
    pub(crate) mailbox: Mailbox,
    pub(crate) link: Arc<PmacLink>,
    pub(crate) motors: Arc<MotorTable>,
    pub(crate) binary_inputs: Arc<BinaryInputTable>,
    pub(crate) bus: Arc<EventBus>,
    pub(crate) orchestrator: Arc<MotionOrchestrator>,
    pub(crate) kv: Arc<dyn KvHandle>,
    pub(crate) sql: Option<Arc<SqlGateway>>,
    pub(crate) abort_requested: Arc<AtomicBool>,
    pub(crate) shutter_opened: Arc<EdgeLatch>,
    pub(crate) shutter_closed: Arc<EdgeLatch>,
    pub(crate) omega_zero: Arc<OmegaZeroSearch>,
    dispatch: HashMap<&'static str, Handler>,
    shutdown: AtomicBool,
}

impl Executor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        link: Arc<PmacLink>,
        motors: Arc<MotorTable>,
        binary_inputs: Arc<BinaryInputTable>,
        bus: Arc<EventBus>,
        orchestrator: Arc<MotionOrchestrator>,
        kv: Arc<dyn KvHandle>,
        sql: Option<Arc<SqlGateway>>,
        omega_zero: Arc<OmegaZeroSearch>,
    ) -> Arc<Self> {
        let shutter_opened = EdgeLatch::new();
        let shutter_closed = EdgeLatch::new();
        {
            let opened = Arc::clone(&shutter_opened);
            let closed = Arc::clone(&shutter_closed);
            let _ = bus.add_listener("^ShutterIsOpen Rising$", move |_| opened.set());
            let _ = bus.add_listener("^ShutterIsOpen Falling$", move |_| closed.set());
        }
        let abort_requested = Arc::new(AtomicBool::new(false));
        {
            // Cancellation is cross-cutting: an "Abort Requested" event sets
            // the flag directly; the KV on-set hook on the dedicated "abort"
            // key is wired by the binary, which alone knows the mirror's key
            // prefix needed to read it back.
            let flag = Arc::clone(&abort_requested);
            let _ = bus.add_listener("^Abort Requested$", move |_| flag.store(true, Ordering::SeqCst));
        }
        {
            let omega_zero = Arc::clone(&omega_zero);
            let sql = sql.clone();
            let _ = bus.add_listener("^Omega Zero Crossing$", move |_| {
                let Some(crossing) = omega_zero.take_crossing() else { return };
                let Some(gateway) = sql.clone() else { return };
                let stamp = crossing
                    .timestamp
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_secs_f64())
                    .unwrap_or(0.0);
                std::thread::spawn(move || {
                    let sql = format!(
                        "SELECT trigcam({stamp}, {}, {}, {})",
                        crossing.zoom, crossing.angle, crossing.velocity
                    );
                    let call = gateway.call(sql);
                    if !call.wait(Duration::from_secs(5)) {
                        tracing::warn!("trigcam SQL call timed out");
                    }
                });
            });
        }

        let mut dispatch: HashMap<&'static str, Handler> = HashMap::new();
        dispatch.insert("abort", Executor::cmd_abort);
        dispatch.insert("changeMode", Executor::cmd_change_mode);
        dispatch.insert("moveAbs", Executor::cmd_move_abs);
        dispatch.insert("moveRel", Executor::cmd_move_rel);
        dispatch.insert("run", Executor::cmd_run);
        dispatch.insert("set", Executor::cmd_set);
        dispatch.insert("setbackvector", Executor::cmd_setbackvector);

        if sql.is_some() {
            dispatch.insert("settransferpoint", Executor::cmd_settransferpoint);
            dispatch.insert("transfer", crate::choreography::cmd_transfer);
            dispatch.insert("collect", crate::choreography::cmd_collect);
            dispatch.insert("rotate", crate::choreography::cmd_rotate);
            dispatch.insert("nonrotate", crate::choreography::cmd_nonrotate);
        }

        Arc::new(Executor {
            mailbox: Mailbox::new(),
            link,
            motors,
            binary_inputs,
            bus,
            orchestrator,
            kv,
            sql,
            abort_requested,
            shutter_opened,
            shutter_closed,
            omega_zero,
            dispatch,
            shutdown: AtomicBool::new(false),
        })
    }

    pub fn post(&self, line: impl Into<String>) {
        self.mailbox.post(line);
    }

    pub fn request_abort(&self) {
        self.abort_requested.store(true, Ordering::SeqCst);
    }

    pub fn clear_abort(&self) {
        self.abort_requested.store(false, Ordering::SeqCst);
    }

    /// Every `move_wait`/`home_wait`/SQL `wait` checkpoint calls this; it is
    /// the granularity the cross-cutting abort rule works at.
    pub fn check_abort(&self) -> Result<(), ExecError> {
        if self.abort_requested.load(Ordering::SeqCst) {
            Err(ExecError::Aborted("abort_requested flag set"))
        } else {
            Ok(())
        }
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn spawn_worker(self: &Arc<Self>) -> JoinHandle<()> {
        let executor = Arc::clone(self);
        std::thread::Builder::new()
            .name("md2-exec".into())
            .spawn(move || executor.worker_loop())
            .expect("failed to spawn command executor thread")
    }

    fn worker_loop(&self) {
        while !self.shutdown.load(Ordering::SeqCst) {
            let Some(line) = self.mailbox.take(Duration::from_millis(500)) else {
                continue;
            };
            self.run_line(&line);
        }
    }

    fn run_line(&self, line: &str) {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else { return };
        let args: Vec<&str> = words.collect();

        let Some(handler) = self.dispatch.get(verb).copied() else {
            status::report(self.kv.as_ref(), status::SEVERITY_FAILURE, &format!("unknown command: {verb}"));
            self.bus.send("Command Unknown");
            return;
        };

        status::report(self.kv.as_ref(), status::SEVERITY_PROGRESS, line);
        match handler(self, &args) {
            Ok(()) => status::report(self.kv.as_ref(), status::SEVERITY_NORMAL, &format!("{verb} done")),
            Err(err) => {
                status::report_error(self.kv.as_ref(), &err);
                self.bus.send(format!("{verb} Aborted"));
            }
        }
    }

    // ---- SQL helper -----------------------------------------------------

    pub(crate) fn call_sql(&self, sql: impl Into<String>, timeout: Duration) -> Result<QueryResult, ExecError> {
        self.check_abort()?;
        let gateway = self.sql.as_ref().ok_or(ExecError::SqlUnavailable)?;
        let call = gateway.call(sql);
        if !call.wait(timeout) {
            return Err(ExecError::Timeout("SQL query"));
        }
        match call.done() {
            Some(Ok(result)) => Ok(result),
            Some(Err(e)) => Err(ExecError::Sql(e)),
            None => Err(ExecError::Sql(SqlError::Timeout)),
        }
    }

    // ---- motor helpers ----------------------------------------------------

    pub(crate) fn motor_position(&self, name: &str) -> Result<f64, ExecError> {
        let idx = self
            .motors
            .index_of_name(name)
            .ok_or_else(|| md2_motion::MotionError::UnknownMotor(name.to_string()))?;
        Ok(self.motors.lock(idx).position)
    }

    /// Counts-per-unit for `motor`, used by `collect` to convert shot
    /// parameters expressed in physical units into `P`-variable counts.
    pub(crate) fn u2c(&self, motor: &str) -> Result<f64, ExecError> {
        let idx = self
            .motors
            .index_of_name(motor)
            .ok_or_else(|| md2_motion::MotionError::UnknownMotor(motor.to_string()))?;
        Ok(self.motors.lock(idx).calibration.counts_per_unit)
    }

    pub(crate) fn max_accel(&self, motor: &str) -> Result<f64, ExecError> {
        let idx = self
            .motors
            .index_of_name(motor)
            .ok_or_else(|| md2_motion::MotionError::UnknownMotor(motor.to_string()))?;
        Ok(self.motors.lock(idx).policy.max_acceleration)
    }

    fn resolve_spec(&self, motor: &str, target: &str, jog: bool) -> MoveSpec {
        if let Ok(value) = target.parse::<f64>() {
            if jog {
                MoveSpec::jog_to(motor, value)
            } else {
                MoveSpec::to_target(motor, value)
            }
        } else {
            MoveSpec::to_preset(motor, target)
        }
    }

    fn close_shutter(&self) {
        for motor_lock in self.motors.iter() {
            let m = motor_lock.lock();
            if let MotorKind::FastShutter { .. } = &m.kind {
                if let Some(commands) = m.fast_shutter_commands(false) {
                    drop(m);
                    for cmd in commands {
                        self.link.send_ascii_no_reply(cmd);
                    }
                }
                return;
            }
        }
    }

    /// Centering-stage interlock: the scintillator never crosses the beam
    /// path without the alignment stage parked out of its way first, and
    /// only returns once the scintillator has settled.
    pub(crate) fn move_scint_interlocked(&self, target_preset: &str) -> Result<(), ExecError> {
        let moving_out_of_beam = target_preset == "Cover";
        if moving_out_of_beam {
            self.move_align_to("Back")?;
        }
        let dispatch = self.orchestrator.move_batch(&[MoveSpec::to_preset("scint", target_preset)])?;
        self.check_abort()?;
        self.orchestrator.move_wait(&dispatch)?;
        if !moving_out_of_beam {
            self.move_align_to("Beam")?;
        }
        Ok(())
    }

    fn move_align_to(&self, preset: &str) -> Result<(), ExecError> {
        let specs: Vec<MoveSpec> = ALIGN_AXES.iter().map(|a| MoveSpec::to_preset(*a, preset)).collect();
        let dispatch = self.orchestrator.move_batch(&specs)?;
        self.check_abort()?;
        self.orchestrator.move_wait(&dispatch)?;
        Ok(())
    }

    // ---- handlers -----------------------------------------------------

    fn cmd_abort(&self, _args: &[&str]) -> Result<(), ExecError> {
        self.close_shutter();
        self.orchestrator.abort()?;

        let deadline = Instant::now() + Duration::from_secs(10);
        for idx in 0..self.motors.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            self.motors.wait_until(idx, remaining, |m| !m.not_done);
        }

        self.close_shutter();
        self.bus.send("Abort Done");
        Ok(())
    }

    fn cmd_change_mode(&self, args: &[&str]) -> Result<(), ExecError> {
        let mode = args
            .first()
            .ok_or_else(|| ExecError::BadArguments { command: "changeMode".into(), detail: "missing mode".into() })?;
        let phase: Phase = mode
            .parse()
            .map_err(|_| ExecError::BadArguments { command: "changeMode".into(), detail: format!("unknown mode {mode}") })?;

        let result = self.run_phase(phase);
        match &result {
            Ok(()) => status::set_phase(self.kv.as_ref(), phase.name()),
            Err(_) => status::set_phase(self.kv.as_ref(), "unknown"),
        }
        result
    }

    fn run_phase(&self, phase: Phase) -> Result<(), ExecError> {
        if !phase.homing_order().is_empty() {
            self.orchestrator.home_prep();
            for motor in phase.homing_order() {
                self.orchestrator.queue_home(motor)?;
            }
            self.check_abort()?;
            if !self.orchestrator.home_wait(Duration::from_secs(60)) {
                return Err(ExecError::Timeout("homing to finish for phase change"));
            }
        }
        self.check_abort()?;
        let mut recipe = phase.recipe();
        let scint_target = recipe
            .iter()
            .position(|s| s.motor == "scint")
            .map(|i| recipe.remove(i))
            .and_then(|s| s.preset);

        if !recipe.is_empty() {
            let dispatch = self.orchestrator.move_batch(&recipe)?;
            self.orchestrator.move_wait(&dispatch)?;
        }
        if let Some(preset) = scint_target {
            self.check_abort()?;
            self.move_scint_interlocked(&preset)?;
        }
        Ok(())
    }

    /// `moveAbs` dispatch: DAC/binary-output/soft motors have no coordinate
    /// system or axis feedback for the orchestrator to track, so they're
    /// handled here by class directly; only ordinary PMAC axes go through
    /// `move_batch`.
    fn cmd_move_abs(&self, args: &[&str]) -> Result<(), ExecError> {
        let [motor, target] = two_args("moveAbs", args)?;
        let idx = self
            .motors
            .index_of_name(motor)
            .ok_or_else(|| md2_motion::MotionError::UnknownMotor(motor.to_string()))?;
        let kind = self.motors.lock(idx).kind.clone();

        match kind {
            MotorKind::BinaryOutput { .. } => {
                let value = matches!(target, "1" | "true" | "True");
                self.move_class_output(idx, motor, value as u8 as f64, |m| m.binary_output_command(value));
                Ok(())
            }
            MotorKind::DacOutput { .. } => {
                let value: f64 = target
                    .parse()
                    .map_err(|_| ExecError::BadArguments { command: "moveAbs".into(), detail: format!("not a number: {target}") })?;
                self.move_class_output(idx, motor, value, |m| m.dac_output_command(value));
                Ok(())
            }
            MotorKind::Soft => {
                let value: f64 = target
                    .parse()
                    .map_err(|_| ExecError::BadArguments { command: "moveAbs".into(), detail: format!("not a number: {target}") })?;
                self.motors.lock(idx).position = value;
                self.bus.send(format!("{motor} Moving"));
                self.bus.send(format!("{motor} In Position"));
                Ok(())
            }
            MotorKind::PmacServoOrStepper { .. } | MotorKind::FastShutter { .. } => {
                let spec = self.resolve_spec(motor, target, false);
                let dispatch = self.orchestrator.move_batch(std::slice::from_ref(&spec))?;
                self.check_abort()?;
                self.orchestrator.move_wait(&dispatch)?;
                Ok(())
            }
        }
    }

    /// Writes a class-specific `M`-variable command with no wire
    /// acknowledgment, then synthesizes completion and records the new
    /// position directly — these motors are not real PMAC axes, so there is
    /// no status-block feedback to wait on.
    fn move_class_output(&self, idx: usize, motor: &str, value: f64, command: impl FnOnce(&Motor) -> Option<String>) {
        let cmd = command(&self.motors.lock(idx));
        if let Some(cmd) = cmd {
            self.link.send_ascii_no_reply(cmd);
        }
        self.motors.lock(idx).position = value;
        self.bus.send(format!("{motor} Moving"));
        self.bus.send(format!("{motor} In Position"));
    }

    fn cmd_move_rel(&self, args: &[&str]) -> Result<(), ExecError> {
        let [motor, delta_str] = two_args("moveRel", args)?;
        let delta: f64 = delta_str
            .parse()
            .map_err(|_| ExecError::BadArguments { command: "moveRel".into(), detail: format!("not a number: {delta_str}") })?;
        let current = self.motor_position(motor)?;
        let dispatch = self.orchestrator.move_batch(&[MoveSpec::to_target(motor, current + delta)])?;
        self.check_abort()?;
        self.orchestrator.move_wait(&dispatch)?;
        Ok(())
    }

    fn cmd_run(&self, args: &[&str]) -> Result<(), ExecError> {
        let [motor, verb] = two_args("run", args)?;
        let idx = self
            .motors
            .index_of_name(motor)
            .ok_or_else(|| md2_motion::MotionError::UnknownMotor(motor.to_string()))?;
        match verb {
            "home" => {
                self.orchestrator.home_prep();
                self.orchestrator.queue_home(motor)?;
                self.check_abort()?;
                if !self.orchestrator.home_wait(Duration::from_secs(60)) {
                    return Err(ExecError::Timeout("motor to finish homing"));
                }
            }
            "stop" => {
                let axis_number = self.motors.lock(idx).axis_number;
                self.link.send_ascii_no_reply(format!("#{axis_number}K"));
            }
            "spin" => {
                let axis_number = self.motors.lock(idx).axis_number;
                self.link.send_ascii_no_reply(format!("#{axis_number}J+"));
            }
            other => {
                return Err(ExecError::BadArguments {
                    command: "run".into(),
                    detail: format!("unknown verb: {other}"),
                });
            }
        }
        Ok(())
    }

    fn cmd_set(&self, args: &[&str]) -> Result<(), ExecError> {
        let [motor, preset] = two_args("set", args)?;
        let position = self.motor_position(motor)?;
        self.kv
            .set_preset(motor, preset, position)
            .map_err(|e| ExecError::Kv(e.to_string()))?;
        Ok(())
    }

    fn cmd_setbackvector(&self, _args: &[&str]) -> Result<(), ExecError> {
        for axis in ALIGN_AXES {
            let current = self.motor_position(axis)?;
            let beam = self
                .kv
                .find_preset(axis, "Beam")
                .map_err(|e| ExecError::Kv(e.to_string()))?;
            self.kv
                .set_preset(axis, "Back_Vector", current - beam)
                .map_err(|e| ExecError::Kv(e.to_string()))?;
            self.kv
                .set_preset(axis, "Back", current)
                .map_err(|e| ExecError::Kv(e.to_string()))?;
        }
        Ok(())
    }

    fn cmd_settransferpoint(&self, _args: &[&str]) -> Result<(), ExecError> {
        self.orchestrator.home_prep();
        for motor in ["kappa", "omega"] {
            self.orchestrator.queue_home(motor)?;
        }
        self.check_abort()?;
        if !self.orchestrator.home_wait(Duration::from_secs(60)) {
            return Err(ExecError::Timeout("kappa/omega homing"));
        }

        self.orchestrator.home_prep();
        self.orchestrator.queue_home("phi")?;
        self.check_abort()?;
        if !self.orchestrator.home_wait(Duration::from_secs(60)) {
            return Err(ExecError::Timeout("phi homing"));
        }

        let ax = self.motor_position("alignx")?;
        let ay = self.motor_position("aligny")?;
        let az = self.motor_position("alignz")?;
        let cx = self.motor_position("centerx")?;
        let cy = self.motor_position("centery")?;

        self.call_sql(
            format!("SELECT settransferpoint({ax}, {ay}, {az}, {cx}, {cy})"),
            Duration::from_secs(10),
        )?;
        Ok(())
    }

    pub(crate) fn wait_binary_input(&self, name: &str, desired: bool, timeout: Duration) -> Result<(), ExecError> {
        let deadline = Instant::now() + timeout;
        loop {
            self.check_abort()?;
            if self.binary_inputs.by_name(name) == Some(desired) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ExecError::Timeout("binary input edge"));
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }
}

fn two_args<'a>(command: &str, args: &[&'a str]) -> Result<[&'a str; 2], ExecError> {
    match args {
        [a, b] => Ok([a, b]),
        _ => Err(ExecError::BadArguments {
            command: command.to_string(),
            detail: format!("expected 2 arguments, got {}", args.len()),
        }),
    }
}

pub(crate) fn column<'a>(result: &'a QueryResult, row: usize, name: &str) -> Option<&'a str> {
    let idx = result.columns.iter().position(|c| c == name)?;
    result.rows.get(row)?.get(idx)?.as_deref()
}
