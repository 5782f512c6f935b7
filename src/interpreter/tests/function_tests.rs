//! Tests for user functions: `call` statements and expression calls

use super::helpers::{compile, completed, engine};
use crate::config::SchedulingMode;
use crate::interpreter::errors::USER_SCRIPT;
use crate::interpreter::{ExecutionOutcome, Val};

#[test]
fn test_call_statement_with_arguments() {
    // function inc(n) { total = total + n } total = 1; call inc 5
    let (engine, _host) = engine(SchedulingMode::Blocking);
    let program = compile(
        r#"
        function inc(n)
          set total = total + n
        end function
        set total = 1
        call inc 5
        call inc 2 * 2
        "#,
    );

    completed(engine.run(program));
    assert_eq!(engine.global("total"), Some(Val::Int(10)));
    assert_eq!(engine.global("n"), None);
    assert!(engine.function("inc").is_some());
}

#[test]
fn test_expression_call_returns_value() {
    // function f(n) { var local = n * 2; return local + 1 } return f(4)
    let (engine, _host) = engine(SchedulingMode::Blocking);
    let program = compile(
        r#"
        function f(n)
          var local = n * 2
          return local + 1
        end function
        return f(4)
        "#,
    );

    assert_eq!(completed(engine.run(program)), Val::Int(9));
    assert_eq!(engine.global("local"), None);
}

#[test]
fn test_missing_parameters_are_null() {
    // function second(a, b) { return b } return second(1)
    let (engine, _host) = engine(SchedulingMode::Blocking);
    let program = compile(
        r#"
        function second(a, b)
          return b
        end function
        return second(1)
        "#,
    );

    assert_eq!(completed(engine.run(program)), Val::Null);
}

#[test]
fn test_arguments_list_holds_every_value() {
    // function all() { return _arguments } return all(1, 2, 3)
    let (engine, _host) = engine(SchedulingMode::Blocking);
    let program = compile(
        r#"
        function all()
          return _arguments
        end function
        return all(1, 2, 3)
        "#,
    );

    assert_eq!(
        completed(engine.run(program)),
        Val::List(vec![Val::Int(1), Val::Int(2), Val::Int(3)])
    );
}

#[test]
fn test_function_without_return_is_null() {
    let (engine, host) = engine(SchedulingMode::Blocking);
    let program = compile(
        r#"
        function hello()
          echo "hi"
        end function
        return hello()
        "#,
    );

    assert_eq!(completed(engine.run(program)), Val::Null);
    assert_eq!(host.output(), vec!["hi"]);
}

#[test]
fn test_return_from_inside_loop_in_function() {
    // function find() { for i ... if i == 3 return i } return find()
    let (engine, host) = engine(SchedulingMode::Blocking);
    let program = compile(
        r#"
        function find()
          for (var i = 0; i < 10; i = i + 1)
            if i == 3
              return i
            end if
          end for
          return -1
        end function
        set found = find()
        echo "after"
        return found
        "#,
    );

    assert_eq!(completed(engine.run(program)), Val::Int(3));
    assert_eq!(host.output(), vec!["after"]);
}

#[test]
fn test_recursive_expression_calls() {
    // function fact(n) { if n <= 1 return 1; return n * fact(n - 1) }
    let (engine, _host) = engine(SchedulingMode::Blocking);
    let program = compile(
        r#"
        function fact(n)
          if n <= 1
            return 1
          end if
          return n * fact(n - 1)
        end function
        return fact(5)
        "#,
    );

    assert_eq!(completed(engine.run(program)), Val::Int(120));
}

#[test]
fn test_unknown_function() {
    let (engine, _host) = engine(SchedulingMode::Blocking);
    let program = compile(
        r#"
        call nope
        "#,
    );

    let ExecutionOutcome::Error(report) = engine.run(program) else {
        panic!("expected error");
    };
    assert_eq!(report.code(), USER_SCRIPT);
    assert!(report.message.contains("function not found: nope"));
}

#[test]
fn test_redefinition_replaces_function() {
    let (engine, _host) = engine(SchedulingMode::Blocking);
    let program = compile(
        r#"
        function v()
          return 1
        end function
        set first = v()
        function v()
          return 2
        end function
        return first + v()
        "#,
    );

    assert_eq!(completed(engine.run(program)), Val::Int(3));
}

#[test]
fn test_nested_call_skips_cooperative_wait() {
    // function slow() { delay 0.5; return 1 } return slow()
    let (engine, host) = engine(SchedulingMode::Cooperative);
    let program = compile(
        r#"
        function slow()
          echo "before"
          delay 0.5
          echo "after"
          return 1
        end function
        return slow()
        "#,
    );

    let outcome = engine.run(program);
    assert!(matches!(outcome, ExecutionOutcome::Completed(Val::Int(1))));
    assert_eq!(host.output(), vec!["before", "after"]);
}
