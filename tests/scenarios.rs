//! End-to-end scenarios: source text through the compiler, a pooled VM and the tick loop.

mod common;

use std::rc::Rc;

use common::{builtins, compile, loaded_vm, output_of, run_to_end};
use tickscript::compiler::Location;
use tickscript::vm::RuntimeErrorKind;
use tickscript::{
    compile_source, Exit, HostFunctions, OutputBuffer, PoolConfig, ScriptCache, Scripts,
    TickReport, Value, VmPool, VmState,
};

// =============================================================================
// The three reference scripts
// =============================================================================

#[test]
fn scenario_a_increment_and_print() {
    assert_eq!(output_of("let x = 1; x = x + 1; print x;"), "2\n");
}

#[test]
fn scenario_b_block_local_is_gone_after_the_block() {
    let error = compile_source("{ let x = 1; } print x;", &HostFunctions::new()).unwrap_err();
    assert_eq!(error.diagnostics.len(), 1);
    assert_eq!(error.diagnostics[0].location, Location::At("x".to_string()));
    assert_eq!(error.diagnostics[0].message, "Undefined variable 'x'.");
}

#[test]
fn scenario_c_yield_inside_a_loop() {
    let source = "
        let i = 0;
        while (i < 3) {
            i = i + 1;
            yield;
            print i;
        }
    ";
    let (mut vm, out) = loaded_vm(source, builtins());
    assert_eq!(vm.run(), Ok(Exit::Yielded));
    assert_eq!(vm.global("i"), Some(Value::Int(1)));
    assert_eq!(out.contents(), "");

    let depth = vm.stack_depth();
    let cursor = vm.instruction_cursor().unwrap();
    assert_eq!(vm.resume(), Ok(Exit::Yielded));
    // the loop variable was not touched while suspended, so the first print shows 1
    assert_eq!(out.contents(), "1\n");
    assert_eq!(vm.stack_depth(), depth);
    assert_eq!(vm.instruction_cursor(), Some(cursor));

    assert_eq!(vm.resume(), Ok(Exit::Yielded));
    assert_eq!(vm.resume(), Ok(Exit::Finished));
    assert_eq!(out.contents(), "1\n2\n3\n");
}

// =============================================================================
// Yielding is invisible to the output
// =============================================================================

#[test]
fn yielding_and_straight_runs_print_the_same() {
    let body = |pause: &str| {
        format!(
            "let total = 0; let n = 0; while (n < 5) {{ total = total + n * n; {} print total; n = n + 1; }}",
            pause
        )
    };
    assert_eq!(output_of(&body("yield;")), output_of(&body("")));
}

// =============================================================================
// Language features together
// =============================================================================

#[test]
fn a_small_steering_script() {
    let source = "
        # walk towards the target, one step per tick
        fun step_towards(from, to, speed) {
            let dx = to.x - from.x;
            let dy = to.y - from.y;
            let heading = vector_xy(dx, dy);
            if (heading.r < speed) return to;
            heading.r = speed;
            return from + heading;
        }

        let position = point(0, 0);
        let target = point(3, 4);
        let ticks = 0;
        while (!(position == target)) {
            position = step_towards(position, target, 2);
            ticks = ticks + 1;
            yield;
        }
        print ticks;
        print position;
    ";
    assert_eq!(output_of(source), "3\n(3, 4)\n");
}

#[test]
fn vector_members_round_trip() {
    let source = "
        let v = vector(2, 0);
        v.t = 0.5;
        print v.r;
        print v.t;
        let w = -v;
        print w.r;
        print (v - v).r;
    ";
    assert_eq!(output_of(source), "2\n0.5\n2\n0\n");
}

#[test]
fn runtime_errors_stop_only_their_script() {
    let (result, output) = run_to_end("print 1;\nlet p = point(1, 1);\nprint p.r;\nprint 2;");
    let error = result.unwrap_err();
    assert_eq!(output, "1\n");
    assert_eq!(
        error.to_string(),
        "Member 'r' needs a vector, got point.\n[line 3] in unnamed script"
    );
}

#[test]
fn natives_registered_by_the_host() {
    let mut functions = HostFunctions::with_builtins();
    functions.register_native("spawn_count", Some(0), |_| Ok(Value::Int(7)));
    functions.register_native("sum", None, |args| {
        let mut total = 0;
        for arg in args {
            match arg {
                Value::Int(i) => total += i,
                other => return Err(format!("can't sum a {}", other.type_name())),
            }
        }
        Ok(Value::Int(total))
    });
    let (mut vm, out) = loaded_vm(
        "print spawn_count(); print sum(); print sum(1, 2, 3); sum(1, true);",
        Rc::new(functions),
    );
    let error = vm.run().unwrap_err();
    assert_eq!(out.contents(), "7\n0\n6\n");
    assert_eq!(
        error.kind,
        RuntimeErrorKind::Native {
            name: "sum".to_string(),
            message: "can't sum a bool".to_string()
        }
    );
}

// =============================================================================
// The whole pipeline: cache, pool, component, ticks
// =============================================================================

#[test]
fn entities_tick_through_a_shared_pool() {
    let mut library = HostFunctions::with_builtins();
    let helpers = compile("fun countdown(n) { while (n > 0) { print n; n = n - 1; yield; } }", &library);
    library.register_program(&helpers);
    let functions = Rc::new(library);

    let mut cache = ScriptCache::new(Rc::clone(&functions));
    cache.insert_source("blink", "countdown(2); print \"blink done\";").unwrap();
    cache.insert_source("crash", "yield; print 1 / 0;").unwrap();

    let mut pool = VmPool::new(functions, PoolConfig { block_size: 1 });
    let out = OutputBuffer::new();
    let mut entities = vec![Scripts::new(), Scripts::new()];
    for (entity, name) in entities.iter_mut().zip(["blink", "crash"]) {
        let program = cache.get(name).unwrap();
        let slot = entity.attach(&mut pool, &program).unwrap();
        let handle = entity.handle(slot).unwrap();
        pool.get_mut(handle).unwrap().set_output(out.clone());
    }
    assert_eq!(pool.capacity(), 2);

    let mut reports = Vec::new();
    for _ in 0..3 {
        reports.push(entities.iter_mut().map(|e| e.tick(&mut pool)).collect::<Vec<_>>());
    }

    // tick 1: both yield; tick 2: blink yields, crash faults; tick 3: blink finishes
    assert_eq!(reports[0][1].yielded, 1);
    assert_eq!(reports[1][1].faults.len(), 1);
    assert_eq!(
        reports[1][1].faults[0].kind,
        RuntimeErrorKind::Value(tickscript::value::ValueError::DivisionByZero)
    );
    assert_eq!(reports[2][0].finished, 1);
    assert_eq!(reports[2][1], TickReport::default());
    assert_eq!(out.contents(), "2\n1\nblink done\n");
    assert!(entities.iter().all(Scripts::is_empty));
    assert_eq!(pool.available(), pool.capacity());
}

#[test]
fn reused_vms_do_not_leak_state_between_scripts() {
    let functions = builtins();
    let mut pool = VmPool::new(Rc::clone(&functions), PoolConfig { block_size: 1 });
    let first = compile("let secret = \"hidden\"; yield;", &functions);
    let second = compile("let other = 1;", &functions);

    let mut scripts = Scripts::new();
    scripts.attach(&mut pool, &first).unwrap();
    scripts.tick(&mut pool);
    scripts.detach_all(&mut pool);

    let slot = scripts.attach(&mut pool, &second).unwrap();
    let vm = pool.get(scripts.handle(slot).unwrap()).unwrap();
    assert_eq!(vm.state(), &VmState::Ready);
    assert_eq!(vm.global("secret"), None);
    assert_eq!(vm.heap().interned_len(), 1);
    assert_eq!(pool.capacity(), 1);
}
