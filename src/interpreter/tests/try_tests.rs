//! Tests for try / catch and pending control flow

use super::helpers::{compile, completed, engine, engine_with};
use crate::config::SchedulingMode;
use crate::interpreter::errors::{DEPTH_EXCEEDED, THROWN};
use crate::interpreter::{ExecutionOutcome, Val};

#[test]
fn test_catch_binds_error_message() {
    // try { fail "boom"; set after = 1 } catch (e) { set caught = e } set done = 1
    let (engine, host) = engine(SchedulingMode::Blocking);
    let program = compile(
        r#"
        try
          fail "boom"
          set after = 1
        end try
        catch e
          set caught = e
        end catch
        set done = 1
        "#,
    );

    completed(engine.run(program));
    assert_eq!(engine.global("e"), Some(Val::Str("boom".into())));
    assert_eq!(engine.global("caught"), Some(Val::Str("boom".into())));
    assert_eq!(engine.global("after"), None);
    assert_eq!(engine.global("done"), Some(Val::Int(1)));
    assert_eq!(host.resets(), 1);
}

#[test]
fn test_catch_skipped_without_error() {
    // try { echo "ok" } catch { echo "caught" } echo "after"
    let (engine, host) = engine(SchedulingMode::Blocking);
    let program = compile(
        r#"
        try
          echo "ok"
        end try
        catch
          echo "caught"
        end catch
        echo "after"
        "#,
    );

    completed(engine.run(program));
    assert_eq!(host.output(), vec!["ok", "after"]);
}

#[test]
fn test_try_without_catch_swallows_error() {
    // try { throw "quiet" } echo "after"
    let (engine, host) = engine(SchedulingMode::Blocking);
    let program = compile(
        r#"
        try
          throw "quiet"
        end try
        echo "after"
        "#,
    );

    completed(engine.run(program));
    assert_eq!(host.output(), vec!["after"]);
}

#[test]
fn test_error_in_called_function_unwinds_to_caller_try() {
    // function f() { throw "inner" } try { call f } catch (e) { echo e }
    let (engine, host) = engine(SchedulingMode::Blocking);
    let program = compile(
        r#"
        function f()
          echo "enter"
          throw "inner " + 1
          echo "unreachable"
        end function
        try
          call f
        end try
        catch e
          echo e
        end catch
        "#,
    );

    completed(engine.run(program));
    assert_eq!(host.output(), vec!["enter", "inner 1"]);
}

#[test]
fn test_error_in_catch_propagates() {
    // try { throw "first" } catch (e) { throw "second" }
    let (engine, _host) = engine(SchedulingMode::Blocking);
    let program = compile(
        r#"
        try
          throw "first"
        end try
        catch e
          throw "second"
        end catch
        "#,
    );

    let ExecutionOutcome::Error(report) = engine.run(program) else {
        panic!("expected error");
    };
    assert_eq!(report.code(), THROWN);
    assert!(report.message.starts_with("second"));
}

#[test]
fn test_nested_try_catches_innermost() {
    // outer try around inner try; the inner catch handles the error
    let (engine, host) = engine(SchedulingMode::Blocking);
    let program = compile(
        r#"
        try
          try
            throw "x"
          end try
          catch e
            echo "inner " + e
          end catch
          echo "between"
        end try
        catch e
          echo "outer " + e
        end catch
        "#,
    );

    completed(engine.run(program));
    assert_eq!(host.output(), vec!["inner x", "between"]);
}

#[test]
fn test_break_through_try_is_pending() {
    // while { while { try { break 2 } } set skipped = 1 } set done = 1
    let (engine, _host) = engine(SchedulingMode::Blocking);
    let program = compile(
        r#"
        while true
          while true
            try
              break 2
            end try
          end while
          set skipped = 1
        end while
        set done = 1
        "#,
    );

    completed(engine.run(program));
    assert_eq!(engine.global("skipped"), None);
    assert_eq!(engine.global("done"), Some(Val::Int(1)));
}

#[test]
fn test_break_through_nested_tries_in_loops() {
    // each try sits inside its own loop; break 2 crosses both
    let (engine, host) = engine(SchedulingMode::Blocking);
    let program = compile(
        r#"
        for (o = 0; o < 2; o = o + 1)
          try
            while true
              try
                break 2
              end try
              echo "inner missed"
            end while
            echo "outer missed"
          end try
          catch e
            echo "caught"
          end catch
          echo "unreached"
        end for
        echo o
        "#,
    );

    completed(engine.run(program));
    assert_eq!(host.output(), vec!["0"]);
}

#[test]
fn test_continue_through_try() {
    // odd numbers only, continue issued inside try
    let (engine, host) = engine(SchedulingMode::Blocking);
    let program = compile(
        r#"
        for (i = 0; i < 4; i = i + 1)
          try
            if i % 2 == 0
              continue
            end if
          end try
          echo i
        end for
        "#,
    );

    completed(engine.run(program));
    assert_eq!(host.output(), vec!["1", "3"]);
}

#[test]
fn test_return_through_try() {
    // function f() { try { return 5 } return 6 }
    let (engine, _host) = engine(SchedulingMode::Blocking);
    let program = compile(
        r#"
        function f()
          try
            return 5
          end try
          return 6
        end function
        return f()
        "#,
    );

    assert_eq!(completed(engine.run(program)), Val::Int(5));
}

#[test]
fn test_depth_exceeded_is_not_catchable() {
    // function down(n) { call down n + 1 } try { call down 0 } catch { }
    let (engine, host) = engine_with(SchedulingMode::Blocking, |c| c.engine.max_depth = 20);
    let program = compile(
        r#"
        function down(n)
          call down n + 1
        end function
        try
          call down 0
        end try
        catch e
          echo "caught"
        end catch
        "#,
    );

    let ExecutionOutcome::Error(report) = engine.run(program) else {
        panic!("expected error");
    };
    assert_eq!(report.code(), DEPTH_EXCEEDED);
    assert!(host.output().is_empty());
}

#[test]
fn test_throw_sets_thrown_value() {
    // try { throw 40 + 2 } catch (e) { }
    let (engine, _host) = engine(SchedulingMode::Blocking);
    let program = compile(
        r#"
        try
          throw 40 + 2
        end try
        catch e
        end catch
        "#,
    );

    completed(engine.run(program));
    assert_eq!(engine.global("thrown_value"), Some(Val::Int(42)));
    assert_eq!(engine.global("e"), Some(Val::Str("42".into())));
}

#[test]
fn test_exit_is_not_caught_by_try() {
    // function f() { while { try { exit } } } call f; echo "after"
    let (engine, host) = engine(SchedulingMode::Blocking);
    let program = compile(
        r#"
        function f()
          while true
            try
              echo "before"
              exit
            end try
            catch e
              echo "caught"
            end catch
          end while
        end function
        call f
        echo "after"
        "#,
    );

    assert!(matches!(engine.run(program), ExecutionOutcome::Stopped));
    assert_eq!(host.output(), vec!["before"]);
}

#[test]
fn test_quit_inside_expression_call_ends_run() {
    let (engine, host) = engine(SchedulingMode::Cooperative);
    let program = compile(
        r#"
        function done()
          quit
        end function
        set x = done()
        echo "unreached"
        "#,
    );

    assert!(matches!(engine.run(program), ExecutionOutcome::Stopped));
    assert!(host.output().is_empty());
    assert_eq!(engine.global("x"), None);
}
