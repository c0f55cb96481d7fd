use std::cell::RefCell;
use std::rc::Rc;

use hive::engine::clock::ManualClock;
use hive::engine::console::Console;
use hive::error::ConsoleError;
use hive::messenger::Messenger;

type Calls = Rc<RefCell<Vec<Vec<String>>>>;

fn setup() -> (Messenger, Console, Calls) {
    let mut bus = Messenger::new(Rc::new(ManualClock::new()));
    let console = Console::new(&mut bus);
    let calls: Calls = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&calls);
    console
        .add_command(&mut bus, "echo", "Print the parameters", move |_, params| {
            sink.borrow_mut().push(params.to_vec());
            Ok(())
        })
        .unwrap();
    (bus, console, calls)
}

#[test]
fn test_commands_run_on_the_next_delivery() {
    let (mut bus, console, calls) = setup();

    console.run(&mut bus, "echo one \"two three\"; echo four").unwrap();
    assert!(calls.borrow().is_empty());

    bus.handle_messages().unwrap();
    assert_eq!(
        *calls.borrow(),
        vec![vec!["one".to_string(), "two three".to_string()], vec!["four".to_string()]]
    );
}

#[test]
fn test_urgent_commands_run_immediately() {
    let (mut bus, console, calls) = setup();
    console.run_urgent(&mut bus, "echo now").unwrap();
    assert_eq!(*calls.borrow(), vec![vec!["now".to_string()]]);
}

#[test]
fn test_duplicate_and_unknown_commands_are_refused() {
    let (mut bus, console, calls) = setup();

    let dup = console.add_command(&mut bus, "echo", "again", |_, _| Ok(()));
    assert!(matches!(dup, Err(ConsoleError::DuplicateCommand(_))));

    let unknown = console.run(&mut bus, "echo fine; launch");
    assert!(matches!(unknown, Err(ConsoleError::UnknownCommand(name)) if name == "launch"));
    assert!(matches!(console.run(&mut bus, "   "), Err(ConsoleError::Empty)));

    bus.handle_messages().unwrap();
    assert!(calls.borrow().is_empty());
}

#[test]
fn test_commands_hold_protected_tags() {
    let (mut bus, console, _) = setup();
    assert!(bus.register("spy", ["console"], false, |_, _| Ok(())).is_err());
    assert!(bus.unregister_by_name("console_echo").is_err());

    assert!(console.remove_command(&mut bus, "echo"));
    assert!(!console.has_command("echo"));
    assert!(!console.remove_command(&mut bus, "echo"));
}

#[test]
fn test_history_skips_repeats_and_hidden_lines() {
    let (mut bus, console, _) = setup();
    console.run(&mut bus, "echo a").unwrap();
    console.run(&mut bus, "echo a").unwrap();
    console.run(&mut bus, " echo secret").unwrap();
    console.run(&mut bus, "echo b").unwrap();
    assert_eq!(console.history(), vec!["echo a", "echo b"]);
}

#[test]
fn test_aliases_expand_to_commands() {
    let (mut bus, console, calls) = setup();
    console.add_alias("greet", "echo hello; echo");
    console.run(&mut bus, "greet world").unwrap();
    bus.handle_messages().unwrap();
    assert_eq!(
        *calls.borrow(),
        vec![vec!["hello".to_string()], vec!["world".to_string()]]
    );
}

#[test]
fn test_completion_is_sorted() {
    let (_, console, _) = setup();
    console.add_alias("eject", "echo bye");
    assert_eq!(console.complete("e"), vec!["echo", "eject"]);
    assert_eq!(console.complete("h"), vec!["help"]);
    assert!(console.complete("z").is_empty());
}

#[test]
fn test_help_output_reaches_the_console_log() {
    let (mut bus, console, _) = setup();
    console.run(&mut bus, "help echo").unwrap();
    bus.handle_messages().unwrap();
    bus.handle_messages().unwrap();

    assert_eq!(
        console.log(),
        vec!["> help echo".to_string(), "echo - Print the parameters".to_string()]
    );
}
