//! Interactive demonstration driver.
//!
//! There is no XML document loader in this crate (out of scope, see `DESIGN.md`), so
//! this binary builds one small chart in-process with `ChartBuilder` and drives it
//! from typed-in event names, to give a hands-on feel for the macrostep loop without
//! needing an SCXML document on disk.
//!
//! Usage: `fsm` — then type an event name per line (`next`, `finish`, or `quit`).

use std::io::{stdout, Write};
use std::sync::Arc;
use std::{io, process};

use scxml_core::chart::{ChartBuilder, StateKind, TransitionKind};
use scxml_core::datamodel::factory_for;
use scxml_core::event::{Event, ExternalQueue};
use scxml_core::event_io_processor::scxml_event_io_processor::ScxmlEventIOProcessor;
use scxml_core::executor::{ChartRegistry, SessionRegistry};
use scxml_core::invoke::InvokeManager;
use scxml_core::session::Session;
use std::sync::Mutex;

/// `idle --next--> busy --next--> idle`, `busy --finish--> done`. A session halts
/// the moment `done` is entered, same as any chart whose root reaches a top-level
/// `<final>`.
fn build_demo_chart() -> Arc<scxml_core::chart::Chart> {
    let mut b = ChartBuilder::new("demo").with_datamodel("null");
    let root = b.add_state("root", StateKind::Compound, None);
    let idle = b.add_state("idle", StateKind::Atomic, Some(root));
    let busy = b.add_state("busy", StateKind::Atomic, Some(root));
    let done = b.add_state("done", StateKind::Final, Some(root));

    b.add_transition(
        idle,
        vec![busy],
        vec!["next".to_string()],
        None,
        TransitionKind::External,
        vec![],
    );
    b.add_transition(
        busy,
        vec![idle],
        vec!["next".to_string()],
        None,
        TransitionKind::External,
        vec![],
    );
    b.add_transition(
        busy,
        vec![done],
        vec!["finish".to_string()],
        None,
        TransitionKind::External,
        vec![],
    );

    let init = b.add_transition(root, vec![idle], vec![], None, TransitionKind::External, vec![]);
    b.set_initial(root, init);
    Arc::new(b.build().expect("demo chart is well-formed"))
}

fn input_loop(sender: std::sync::mpsc::Sender<Box<Event>>) {
    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("\nEnter event (next / finish / quit) >> ");
        let _ = stdout().flush();
        line.clear();
        match stdin.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                if trimmed.eq_ignore_ascii_case("quit") {
                    let _ = sender.send(Box::new(Event::internal("cancel.session")));
                    break;
                }
                if sender.send(Box::new(Event::external(trimmed))).is_err() {
                    eprintln!("session has already finished");
                    break;
                }
            }
            Err(e) => {
                eprintln!("error reading stdin: {e}");
                process::exit(1);
            }
        }
    }
}

fn main() {
    #[cfg(feature = "EnvLog")]
    env_logger::init();

    let chart = build_demo_chart();
    let registry = Arc::new(SessionRegistry::new());
    let charts = Arc::new(ChartRegistry::new());
    let invokes = Arc::new(Mutex::new(InvokeManager::new()));
    let io_processor = Box::new(ScxmlEventIOProcessor::new(registry.clone(), invokes.clone()));
    let session_id = registry.allocate_session_id();
    let external_queue = ExternalQueue::new();
    let sender = external_queue.sender.clone();
    registry.register(session_id, sender.clone(), None);

    let datamodel_factory = factory_for("null").expect("null data model is always available");
    let session = Session::new(
        session_id,
        chart,
        datamodel_factory,
        registry,
        charts,
        io_processor,
        external_queue,
        None,
        Vec::new(),
        invokes,
    );

    let session_thread = std::thread::spawn(move || session.run());
    input_loop(sender);

    match session_thread.join() {
        Ok((_, _)) => println!("\nsession finished"),
        Err(_) => eprintln!("session thread panicked"),
    }
}
