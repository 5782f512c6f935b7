//! Tests for while / for loops, break and continue

use super::helpers::{compile, completed, engine};
use crate::config::SchedulingMode;
use crate::interpreter::errors::USER_SCRIPT;
use crate::interpreter::{ExecutionOutcome, Val};
use std::collections::BTreeSet;

#[test]
fn test_while_counts() {
    // i = 0; while (i < 3) { i = i + 1 } return i
    let (engine, _host) = engine(SchedulingMode::Blocking);
    let program = compile(
        r#"
        set i = 0
        while i < 3
          set i = i + 1
        end while
        return i
        "#,
    );

    assert_eq!(completed(engine.run(program)), Val::Int(3));
}

#[test]
fn test_while_zero_iterations() {
    // while (false) { echo "never" } echo "after"
    let (engine, host) = engine(SchedulingMode::Blocking);
    let program = compile(
        r#"
        while false
          echo "never"
        end while
        echo "after"
        "#,
    );

    completed(engine.run(program));
    assert_eq!(host.output(), vec!["after"]);
}

#[test]
fn test_for_break_at_one() {
    // for (i = 0; i < 3; i = i + 1) { if (i == 1) { break } }
    let (engine, host) = engine(SchedulingMode::Blocking);
    let program = compile(
        r#"
        for (i = 0; i < 3; i = i + 1)
          echo i
          if i == 1
            break
          end if
        end for
        "#,
    );

    completed(engine.run(program));
    assert_eq!(engine.global("i"), Some(Val::Int(1)));
    assert_eq!(host.output(), vec!["0", "1"]);
}

#[test]
fn test_for_continue_runs_step() {
    // sum of 1..=4 skipping 2
    let (engine, _host) = engine(SchedulingMode::Blocking);
    let program = compile(
        r#"
        set sum = 0
        for (i = 1; i <= 4; i = i + 1)
          if i == 2
            continue
          end if
          set sum = sum + i
        end for
        return sum
        "#,
    );

    assert_eq!(completed(engine.run(program)), Val::Int(8));
}

#[test]
fn test_while_continue_rechecks_condition() {
    // i counts to 5; odd values are echoed
    let (engine, host) = engine(SchedulingMode::Blocking);
    let program = compile(
        r#"
        set i = 0
        while i < 5
          set i = i + 1
          if i % 2 == 0
            continue
          end if
          echo i
        end while
        "#,
    );

    completed(engine.run(program));
    assert_eq!(host.output(), vec!["1", "3", "5"]);
}

#[test]
fn test_for_without_condition_needs_break() {
    // for (var k = 0; ; k = k + 1) { if k == 3 { break } }
    let (engine, host) = engine(SchedulingMode::Blocking);
    let program = compile(
        r#"
        for (var k = 0; ; k = k + 1)
          if k == 3
            break
          end if
          echo k
        end for
        "#,
    );

    completed(engine.run(program));
    assert_eq!(host.output(), vec!["0", "1", "2"]);
    assert_eq!(engine.global("k"), None);
}

#[test]
fn test_for_in_list_and_set() {
    // total over a list; each element of a bitset is a single-element set
    let (engine, host) = engine(SchedulingMode::Blocking);
    engine.set_global("atoms", Val::Set(BTreeSet::from([2, 5])));
    let program = compile(
        r#"
        set total = 0
        for x in [1, 2, 3]
          set total = total + x
        end for
        for var a in atoms
          echo a
        end for
        return total
        "#,
    );

    assert_eq!(completed(engine.run(program)), Val::Int(6));
    assert_eq!(host.output(), vec!["({2})", "({5})"]);
    assert_eq!(engine.global("x"), Some(Val::Int(3)));
    assert_eq!(engine.global("a"), None);
}

#[test]
fn test_for_in_requires_collection() {
    // for x in 5
    let (engine, _host) = engine(SchedulingMode::Blocking);
    let program = compile(
        r#"
        for x in 5
          echo x
        end for
        "#,
    );

    let ExecutionOutcome::Error(report) = engine.run(program) else {
        panic!("expected error");
    };
    assert_eq!(report.code(), USER_SCRIPT);
    assert!(report.message.contains("cannot iterate over integer"));
}

#[test]
fn test_break_n_exits_n_levels() {
    // two nested loops inside a third; break 2 leaves the inner two
    let (engine, host) = engine(SchedulingMode::Blocking);
    let program = compile(
        r#"
        for (o = 0; o < 2; o = o + 1)
          while true
            while true
              break 2
            end while
            echo "missed"
          end while
          echo o
        end for
        "#,
    );

    completed(engine.run(program));
    assert_eq!(host.output(), vec!["0", "1"]);
}

#[test]
fn test_break_count_is_clamped() {
    // break 5 with two enclosing loops leaves both
    let (engine, _host) = engine(SchedulingMode::Blocking);
    let program = compile(
        r#"
        set count = 0
        while true
          while true
            set count = count + 1
            break 5
          end while
        end while
        return count
        "#,
    );

    assert_eq!(completed(engine.run(program)), Val::Int(1));
}

#[test]
fn test_break_zero_is_ignored() {
    // break 0 does nothing
    let (engine, host) = engine(SchedulingMode::Blocking);
    let program = compile(
        r#"
        set i = 0
        while i < 2
          set i = i + 1
          break 0
          echo i
        end while
        "#,
    );

    completed(engine.run(program));
    assert_eq!(host.output(), vec!["1", "2"]);
}

#[test]
fn test_break_outside_loop_is_error() {
    // break
    let (engine, _host) = engine(SchedulingMode::Blocking);
    let ExecutionOutcome::Error(report) = engine.run(compile("break")) else {
        panic!("expected error");
    };
    assert_eq!(report.code(), USER_SCRIPT);
}

#[test]
fn test_loop_context_is_popped_on_exit() {
    // loop variables declared with var live only in the loop
    let (engine, _host) = engine(SchedulingMode::Blocking);
    let program = compile(
        r#"
        set n = 0
        while n < 2
          var inside = n
          set n = n + 1
        end while
        return inside
        "#,
    );

    let ExecutionOutcome::Error(report) = engine.run(program) else {
        panic!("expected error");
    };
    assert!(report.message.contains("undefined variable: inside"));
    // only the root is left when the error is raised
    assert_eq!(report.message.lines().count(), 2);
}
