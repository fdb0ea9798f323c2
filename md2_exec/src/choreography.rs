//! The three multi-phase scripted commands: `transfer`, `collect`, and
//! `rotate`/`nonrotate`. Each is a straight-line translation of its
//! choreography into calls against the motion orchestrator, the SQL
//! gateway, and the binary-input/edge-latch state — checking
//! `check_abort()` at every wait, per the cross-cutting abort rule.

use crate::error::ExecError;
use crate::executor::{column, Executor, ALIGN_AXES, CENTER_AXES};
use crate::status;
use md2_motion::MoveSpec;
use std::time::Duration;

pub fn cmd_transfer(exec: &Executor, _args: &[&str]) -> Result<(), ExecError> {
    let next = exec.call_sql("SELECT * FROM nextsample()", Duration::from_secs(10))?;
    if next.is_empty() {
        status::report(exec.kv.as_ref(), status::SEVERITY_NORMAL, "no sample queued for transfer");
        return Ok(());
    }
    let sample = column(&next, 0, "sample").unwrap_or_default().to_string();

    exec.check_abort()?;
    let deadline_all_stopped = Duration::from_secs(30);
    let mut any_moving = false;
    for idx in 0..exec.motors.len() {
        if !exec.motors.wait_until(idx, deadline_all_stopped, |m| !m.not_done) {
            any_moving = true;
        }
    }
    if any_moving {
        return Err(ExecError::Timeout("in-progress motion to settle before transfer"));
    }

    let cx = exec.motor_position("centerx")?;
    let cy = exec.motor_position("centery")?;
    let omega_ref = exec.motor_position("omega")?;
    let omega_rad = omega_ref.to_radians();
    let horz = cx * omega_rad.cos() + cy * omega_rad.sin();
    let vert = -cx * omega_rad.sin() + cy * omega_rad.cos();
    let ax = exec.motor_position("alignx")?;
    let ay = exec.motor_position("aligny")?;
    let az = exec.motor_position("alignz")?;
    let est_move_time = 10.0_f64;

    let start = exec.call_sql(
        format!("SELECT * FROM starttransfer('{sample}', true, {ax}, {ay}, {az}, {horz}, {vert}, {est_move_time})"),
        Duration::from_secs(10),
    )?;

    exec.orchestrator.home_prep();
    exec.orchestrator.queue_home("kappa")?;
    exec.orchestrator.queue_home("omega")?;

    let retract = exec.orchestrator.move_batch(&[
        MoveSpec::to_preset("capz", "Cover"),
        MoveSpec::to_preset("scint", "Cover"),
        MoveSpec::to_preset("backlight", "Back"),
        MoveSpec::to_preset("cryo", "Back"),
        MoveSpec::to_preset("fluo", "Back"),
    ])?;

    exec.check_abort()?;
    if !exec.orchestrator.home_wait(Duration::from_secs(60)) {
        return Err(ExecError::Timeout("kappa/omega homing during transfer"));
    }
    exec.orchestrator.move_wait(&retract)?;

    if start.is_empty() || column(&start, 0, "mounted_sample").unwrap_or_default().is_empty() {
        exec.bus.send("Transfer Aborted");
        return Err(ExecError::Aborted("starttransfer returned no mounted sample mapping"));
    }

    exec.wait_binary_input("BackLightDown", true, Duration::from_secs(10))?;
    exec.wait_binary_input("FluoDetectorBack", true, Duration::from_secs(10))?;

    exec.call_sql("SELECT * FROM waitcryo()", Duration::from_secs(120))?;

    let cryo_back = exec.orchestrator.move_batch(&[MoveSpec::to_preset("cryo", "Back")])?;
    exec.check_abort()?;
    exec.orchestrator.move_wait(&cryo_back)?;
    exec.call_sql("SELECT * FROM dropairrights()", Duration::from_secs(10))?;

    let deadline = std::time::Instant::now() + Duration::from_secs(120);
    loop {
        exec.check_abort()?;
        let current = exec.call_sql("SELECT * FROM getcurrentsampleid()", Duration::from_secs(10))?;
        if column(&current, 0, "sampleid") == Some(sample.as_str()) {
            break;
        }
        if std::time::Instant::now() >= deadline {
            exec.bus.send("Transfer Aborted");
            return Err(ExecError::Timeout("current sample to match requested sample"));
        }
        std::thread::sleep(Duration::from_millis(200));
    }

    exec.call_sql("SELECT * FROM demandairrights()", Duration::from_secs(10))?;
    let cryo_operate = exec.orchestrator.move_batch(&[MoveSpec::to_preset("cryo", "Operate")])?;
    exec.check_abort()?;
    exec.orchestrator.move_wait(&cryo_operate)?;

    exec.bus.send("Transfer Done");
    Ok(())
}

/// Runs the collect loop, then on any early error marks the in-flight shot
/// `Error`, clears `collection.running`, and emits `Data Collection Aborted`
/// — whether the loop stopped on `check_abort()`, a SQL failure, or a
/// shutter/motion timeout, the three effects are the same.
pub fn cmd_collect(exec: &Executor, _args: &[&str]) -> Result<(), ExecError> {
    status::set_phase(exec.kv.as_ref(), "dataCollection");
    let _ = exec.kv.setstr("collection.running", "True");

    let mut current_skey: Option<String> = None;
    let result = collect_loop(exec, &mut current_skey);
    let _ = exec.kv.setstr("collection.running", "False");

    if result.is_err() {
        if let Some(skey) = current_skey {
            let _ = exec.call_sql(format!("SELECT shots_set_state({skey}, 'Error')"), Duration::from_secs(10));
        }
        exec.bus.send("Data Collection Aborted");
    }

    result
}

fn collect_loop(exec: &Executor, current_skey: &mut Option<String>) -> Result<(), ExecError> {
    loop {
        exec.check_abort()?;
        let shot = exec.call_sql("SELECT * FROM nextshot()", Duration::from_secs(10))?;
        if shot.is_empty() {
            break;
        }
        let skey = column(&shot, 0, "skey").unwrap_or_default().to_string();
        *current_skey = Some(skey.clone());

        exec.call_sql(format!("SELECT shots_set_state({skey}, 'Preparing')"), Duration::from_secs(10))?;
        let _ = exec.kv.setstr("shot.state", "Preparing");

        if let Some(cx) = column(&shot, 0, "centerx").and_then(|v| v.parse::<f64>().ok()) {
            let cy: f64 = column(&shot, 0, "centery").and_then(|v| v.parse().ok()).unwrap_or(0.0);
            let ax: f64 = column(&shot, 0, "alignx").and_then(|v| v.parse().ok()).unwrap_or(0.0);
            let ay: f64 = column(&shot, 0, "aligny").and_then(|v| v.parse().ok()).unwrap_or(0.0);
            let az: f64 = column(&shot, 0, "alignz").and_then(|v| v.parse().ok()).unwrap_or(0.0);
            let dispatch = exec.orchestrator.move_batch(&[
                MoveSpec::to_target(CENTER_AXES[0], cx),
                MoveSpec::to_target(CENTER_AXES[1], cy),
                MoveSpec::to_target(ALIGN_AXES[0], ax),
                MoveSpec::to_target(ALIGN_AXES[1], ay),
                MoveSpec::to_target(ALIGN_AXES[2], az),
            ])?;
            exec.check_abort()?;
            exec.orchestrator.move_wait(&dispatch)?;
        }

        let kappa = column(&shot, 0, "kappa").and_then(|v| v.parse::<f64>().ok());
        let phi = column(&shot, 0, "phi").and_then(|v| v.parse::<f64>().ok());
        if kappa.is_some() || phi.is_some() {
            let mut specs = Vec::new();
            if let Some(k) = kappa {
                specs.push(MoveSpec::to_target("kappa", k));
            }
            if let Some(p) = phi {
                specs.push(MoveSpec::to_target("phi", p));
            }
            let dispatch = exec.orchestrator.move_batch(&specs)?;
            exec.check_abort()?;
            exec.orchestrator.move_wait(&dispatch)?;
        }

        let start: f64 = column(&shot, 0, "start").and_then(|v| v.parse().ok()).unwrap_or(0.0);
        let neutral: f64 = column(&shot, 0, "neutral").and_then(|v| v.parse().ok()).unwrap_or(0.0);
        let width: f64 = column(&shot, 0, "width").and_then(|v| v.parse().ok()).unwrap_or(1.0);
        let exp_ms: f64 = column(&shot, 0, "exposure_ms").and_then(|v| v.parse().ok()).unwrap_or(1000.0);
        let u2c = exec.u2c("omega")?;
        let max_accel = exec.max_accel("omega")?;

        let p170 = u2c * (start + neutral);
        let p171 = u2c * width;
        let p173 = u2c * width / (exp_ms / 1000.0);
        let p175 = p173 / max_accel;
        let p180 = exp_ms;

        exec.call_sql(
            format!("SELECT * FROM seq_run_prep({skey}, {kappa_v}, {phi_v}, {cx}, {cy}, {ax}, {ay}, {az})",
                kappa_v = kappa.unwrap_or(0.0),
                phi_v = phi.unwrap_or(0.0),
                cx = column(&shot, 0, "centerx").unwrap_or("0"),
                cy = column(&shot, 0, "centery").unwrap_or("0"),
                ax = column(&shot, 0, "alignx").unwrap_or("0"),
                ay = column(&shot, 0, "aligny").unwrap_or("0"),
                az = column(&shot, 0, "alignz").unwrap_or("0"),
            ),
            Duration::from_secs(10),
        )?;

        exec.shutter_closed.reset();
        if !exec.shutter_opened.wait_clear(Duration::from_secs(10)) {
            return Err(ExecError::Timeout("previous shutter open/close cycle to be observed"));
        }

        exec.call_sql("SELECT * FROM lock_detector()", Duration::from_secs(10))?;
        exec.call_sql("SELECT * FROM unlock_detector()", Duration::from_secs(10))?;

        exec.link.send_ascii_no_reply(format!(
            "&1 P170={p170} P171={p171} P173={p173} P175={p175} P180={p180} M431=1 B131R"
        ));

        if !exec.shutter_opened.wait_set(Duration::from_secs(10)) {
            exec.call_sql("SELECT * FROM unlock_diffractometer()", Duration::from_secs(10))?;
            status::report(exec.kv.as_ref(), status::SEVERITY_FAILURE, "Timed out waiting for shutter to open.");
            return Err(ExecError::Timeout("shutter to open"));
        }

        let exposure_budget = Duration::from_secs_f64(4.0 + exp_ms / 1000.0);
        if !exec.shutter_closed.wait_set(exposure_budget) {
            exec.call_sql("SELECT * FROM unlock_diffractometer()", Duration::from_secs(10))?;
            status::report(exec.kv.as_ref(), status::SEVERITY_FAILURE, "Timed out waiting for shutter to close.");
            return Err(ExecError::Timeout("shutter to close"));
        }

        exec.call_sql("SELECT * FROM unlock_diffractometer()", Duration::from_secs(10))?;
        exec.call_sql(format!("SELECT shots_set_state({skey}, 'Writing')"), Duration::from_secs(10))?;
        let _ = exec.kv.setstr("shot.state", "Writing");
        exec.shutter_opened.reset();

        let omega_idx = exec
            .motors
            .index_of_name("omega")
            .ok_or_else(|| md2_motion::MotionError::UnknownMotor("omega".to_string()))?;
        if !exec.motors.wait_until(omega_idx, Duration::from_secs(10), |m| !m.not_done) {
            return Err(ExecError::Timeout("omega to stop after exposure"));
        }

        *current_skey = None;
    }

    Ok(())
}

pub fn cmd_rotate(exec: &Executor, args: &[&str]) -> Result<(), ExecError> {
    rotate_or_nonrotate(exec, args, true)
}

pub fn cmd_nonrotate(exec: &Executor, args: &[&str]) -> Result<(), ExecError> {
    rotate_or_nonrotate(exec, args, false)
}

fn rotate_or_nonrotate(exec: &Executor, _args: &[&str], spin: bool) -> Result<(), ExecError> {
    let center = exec.call_sql("SELECT * FROM getcenter()", Duration::from_secs(10))?;
    let dcx: f64 = column(&center, 0, "dcenterx").and_then(|v| v.parse().ok()).unwrap_or(0.0);
    let dcy: f64 = column(&center, 0, "dcentery").and_then(|v| v.parse().ok()).unwrap_or(0.0);
    let dax: f64 = column(&center, 0, "dalignx").and_then(|v| v.parse().ok()).unwrap_or(0.0);
    let day: f64 = column(&center, 0, "daligny").and_then(|v| v.parse().ok()).unwrap_or(0.0);
    let daz: f64 = column(&center, 0, "dalignz").and_then(|v| v.parse().ok()).unwrap_or(0.0);
    let zoom: Option<f64> = column(&center, 0, "zoom").and_then(|v| v.parse().ok());

    let backlight_up = exec.orchestrator.move_batch(&[MoveSpec::to_preset("backlight", "In")])?;
    exec.check_abort()?;
    exec.orchestrator.move_wait(&backlight_up)?;

    exec.orchestrator.home_prep();
    exec.orchestrator.queue_home("omega")?;
    exec.check_abort()?;
    if !exec.orchestrator.home_wait(Duration::from_secs(60)) {
        return Err(ExecError::Timeout("omega homing before rotate"));
    }

    let new_cx = exec.motor_position("centerx")? + dcx;
    let new_cy = exec.motor_position("centery")? + dcy;
    let new_ax = exec.motor_position("alignx")? + dax;
    let new_ay = exec.motor_position("aligny")? + day;
    let new_az = exec.motor_position("alignz")? + daz;

    for axis in ALIGN_AXES {
        let beam = exec.kv.find_preset(axis, "Beam").map_err(|e| ExecError::Kv(e.to_string()))?;
        let vector = exec.kv.find_preset(axis, "Back_Vector").unwrap_or(0.0);
        exec.kv
            .set_preset(axis, "Back", beam + vector)
            .map_err(|e| ExecError::Kv(e.to_string()))?;
    }
    let mut specs = vec![
        MoveSpec::to_preset("scint", "Cover"),
        MoveSpec::to_preset("capz", "Cover"),
        MoveSpec::to_target(CENTER_AXES[0], new_cx),
        MoveSpec::to_target(CENTER_AXES[1], new_cy),
        MoveSpec::to_target(ALIGN_AXES[0], new_ax),
        MoveSpec::to_target(ALIGN_AXES[1], new_ay),
        MoveSpec::to_target(ALIGN_AXES[2], new_az),
    ];
    if let Some(z) = zoom {
        specs.push(MoveSpec::to_target("zoom", z));
    }
    let dispatch = exec.orchestrator.move_batch(&specs)?;
    exec.check_abort()?;
    exec.orchestrator.move_wait(&dispatch)?;

    if spin {
        exec.omega_zero.arm();
        exec.link.send_ascii_no_reply("&1 Q80=90 Q81=360 B190R");
    }

    Ok(())
}
