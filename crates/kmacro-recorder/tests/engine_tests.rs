use kmacro_core::{ErrorCode, KeyStroke, Parameters};
use kmacro_recorder::{
    AutoLoadPolicy, Binding, EngineConfig, EngineState, EventLog, MacroEngine, MacroEvent,
    MacroStorage, ScratchEditor, ScratchSession,
};

fn session() -> ScratchSession {
    ScratchSession::new(MacroEngine::new(EngineConfig::default()))
}

fn session_with_text(text: &str) -> ScratchSession {
    let mut s = session();
    *s.editor_mut() = ScratchEditor::default().with_text(text);
    s
}

fn stored_session(dir: &std::path::Path, config: EngineConfig) -> ScratchSession {
    let storage = MacroStorage::with_dir(dir).expect("storage");
    ScratchSession::new(MacroEngine::with_storage(config, storage))
}

fn params(pairs: &[(&str, &str)]) -> Parameters {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

fn current(s: &ScratchSession) -> String {
    s.engine().current_macro().map(EventLog::to_compact).unwrap_or_default()
}

#[test]
fn typed_text_round_trips() {
    let mut s = session();
    s.engine_mut().start_definition(false).expect("start");
    s.type_text("Hi!").expect("type");
    assert!(s.engine_mut().end_definition(false));

    let expected: EventLog = "Hi!"
        .chars()
        .map(|c| MacroEvent::from_key(&KeyStroke::from_char(c)))
        .collect();
    assert_eq!(s.engine().current_macro(), Some(&expected));
    assert_eq!(current(&s), "H, i, !");

    *s.editor_mut() = ScratchEditor::default();
    s.execute_current(1).expect("replay");
    assert_eq!(s.editor().text(), "Hi!");
}

#[test]
fn replay_reproduces_manual_edits() {
    let start = "one two\nthree";
    let mut s = session_with_text(start);
    s.press_keys("C-x ( C-a M-u C-a C-u 2 C-f x RET C-x )").expect("record");
    let manual = s.editor().text();
    assert_eq!(manual, "one two\nTHx\nREE");

    let log = s.engine().current_macro().cloned().expect("macro");
    assert_eq!(log.provisional_count(), 0);
    assert!(log.iter().any(|e| *e == MacroEvent::command("forward-char", Some(params(&[("repeat-count", "2")])))));
    assert!(!log.iter().any(|e| e.is_command("universal-argument")));

    *s.editor_mut() = ScratchEditor::default().with_text(start);
    s.execute_current(1).expect("replay");
    assert_eq!(s.editor().text(), manual);
}

#[test]
fn naming_copies_the_current_macro() {
    let mut s = session();
    s.press_keys("C-x ( a b C-x )").expect("record");
    let id = s.engine_mut().name_current("ab").expect("name");

    assert_eq!(s.engine().lookup("ab"), s.engine().current_macro());
    assert_eq!(s.engine().completions().get("ab"), Some(&id));

    // a later definition does not change the named copy
    s.press_keys("C-x ( c C-x )").expect("record");
    assert_eq!(s.engine().lookup("ab").map(EventLog::to_compact).as_deref(), Some("a, b, <minibuffer-exit>"));

    let again = s.engine_mut().name_current("ab").expect("rename");
    assert_ne!(id, again);
    assert_eq!(s.engine().completions().len(), 1);
}

#[test]
fn naming_without_a_macro_fails() {
    let mut engine = MacroEngine::new(EngineConfig::default());
    assert_eq!(engine.name_current("x").unwrap_err().code, ErrorCode::NoMacro);
}

#[test]
fn universal_argument_is_recorded_once() {
    let mut engine = MacroEngine::new(EngineConfig::default());
    let count = params(&[("repeat-count", "3")]);
    engine.start_definition(false).expect("start");

    engine.check_trigger("universal-argument", None, &[], false);
    engine.on_pre_execute("universal-argument", None);
    engine.on_post_execute_success("universal-argument");
    engine.on_key_event(&KeyStroke::from_char('3'));
    engine.on_pre_execute("forward-word", Some(&count));
    engine.check_trigger("forward-word", Some(count.clone()), &[], false);
    engine.on_post_execute_success("forward-word");
    assert!(engine.end_definition(false));

    assert_eq!(
        engine.current_macro().map(EventLog::events),
        Some(&[MacroEvent::command("forward-word", Some(count))][..])
    );
}

#[test]
fn resolved_binding_leaves_no_provisional_key() {
    let mut engine = MacroEngine::new(EngineConfig::default());
    engine.start_definition(false).expect("start");
    let keys = KeyStroke::parse_sequence("C-x C-s").expect("keys");
    for key in &keys {
        engine.on_key_event(key);
    }
    engine.check_binding(&Binding::new(keys, "save-buffer"));

    let log = engine.recording();
    assert_eq!(log.provisional_count(), 0);
    assert_eq!(
        &log.events()[log.len() - 2..],
        &[MacroEvent::MinibufferExit, MacroEvent::command("save-buffer", None)]
    );
}

#[test]
fn history_ring_wraps() {
    let config = EngineConfig { history_capacity: 3, ..Default::default() };
    let mut s = ScratchSession::new(MacroEngine::new(config));
    for c in ["a", "b", "c", "d"] {
        s.engine_mut().start_definition(false).expect("start");
        s.type_text(c).expect("type");
        s.engine_mut().end_definition(false);
    }
    assert_eq!(s.engine().history().len(), 3);
    assert_eq!(current(&s), "d");

    let head = s.engine().current_macro().cloned();
    let mut last = None;
    for _ in 0..3 {
        last = s.history_previous();
    }
    assert_eq!(last, head);
    assert_eq!(s.editor().last_message(), Some("Macro 1/3: d"));

    assert_eq!(s.history_next().map(|l| l.to_compact()).as_deref(), Some("c"));
    assert_eq!(s.history_next().map(|l| l.to_compact()).as_deref(), Some("b"));
    // "a" was evicted
    assert_eq!(s.history_next().map(|l| l.to_compact()).as_deref(), Some("d"));
}

#[test]
fn abort_restores_previous_macro() {
    let mut s = session();
    s.engine_mut().start_definition(false).expect("start");
    s.type_text("zz").expect("type");
    assert!(s.engine_mut().end_definition(true));
    assert!(s.engine().current_macro().is_none());

    s.press_keys("C-x ( x C-x )").expect("record");
    let before = s.engine().current_macro().cloned();
    s.engine_mut().start_definition(false).expect("start");
    s.type_text("yz").expect("type");
    s.engine_mut().end_definition(true);
    assert_eq!(s.engine().current_macro().cloned(), before);
    assert_eq!(s.engine().state(), EngineState::Idle);
}

#[test]
fn empty_definition_keeps_current_macro() {
    let mut s = session();
    s.press_keys("C-x ( q C-x )").expect("record");
    s.engine_mut().start_definition(false).expect("start");
    s.engine_mut().end_definition(false);
    assert_eq!(current(&s), "q, <minibuffer-exit>");
    assert_eq!(s.engine().history().len(), 1);
}

#[test]
fn nested_calls_run_under_one_execution() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut s = stored_session(dir.path(), EngineConfig::default());
    s.press_keys("C-x ( a b C-x = C-x )").expect("record");
    s.engine_mut().name_current("inner").expect("name");

    let outer = EventLog::from_events(vec![
        MacroEvent::from_key(&KeyStroke::from_char('o')),
        MacroEvent::command("kmacro-call-named", Some(params(&[("name", "inner")]))),
        MacroEvent::command("kmacro-call-macro", None),
    ]);
    MacroStorage::with_dir(dir.path())
        .and_then(|storage| storage.save("outer", &outer, None))
        .expect("save outer");
    s.engine_mut()
        .load_from_storage(AutoLoadPolicy::Subset(vec!["outer".into()]))
        .expect("schedule");
    s.run_deferred();

    *s.editor_mut() = ScratchEditor::default();
    s.execute_named("outer", 1).expect("replay");

    assert_eq!(s.editor().text(), "oabab");
    // what-cursor-position ran twice while messages were suppressed
    assert!(s.editor().messages().is_empty());
    assert_eq!(s.editor().redraws(), 1);
    assert!(s.editor().redraw_enabled());
    assert!(!s.engine().is_executing());

    let stats = s.engine().last_replay_stats();
    assert_eq!(stats.nested, 2);
    assert_eq!(stats.keys, 5);
}

#[test]
fn self_calling_macro_is_stopped() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = EngineConfig { max_depth: 8, ..Default::default() };
    let storage = MacroStorage::with_dir(dir.path()).expect("storage");
    let looping = EventLog::from_events(vec![MacroEvent::command(
        "kmacro-call-named",
        Some(params(&[("name", "loop")])),
    )]);
    storage.save("loop", &looping, None).expect("save");

    let mut s = ScratchSession::new(MacroEngine::with_storage(config, storage));
    s.engine_mut()
        .load_from_storage(AutoLoadPolicy::All)
        .expect("schedule");
    s.run_deferred();

    let err = s.execute_named("loop", 1).unwrap_err();
    assert_eq!(err.code, ErrorCode::NestingTooDeep);
    assert_eq!(s.editor().beeps(), 1);
    assert!(s.editor().redraw_enabled());
    assert_eq!(s.engine().state(), EngineState::Idle);
}

#[test]
fn recorded_call_replays_the_previous_macro() {
    let mut s = session();
    s.press_keys("C-x ( a C-x )").expect("record first");
    s.press_keys("C-x ( b <f4> C-x )").expect("record with call");
    assert_eq!(s.editor().text(), "aba");
    assert_eq!(
        current(&s),
        "b, <minibuffer-exit>, kmacro-call-macro, <minibuffer-exit>"
    );
    assert_eq!(s.engine().history().len(), 2);

    *s.editor_mut() = ScratchEditor::default();
    s.execute_current(1).expect("replay");
    assert_eq!(s.editor().text(), "ba");
    assert_eq!(s.engine().last_replay_stats().nested, 1);
    assert_eq!(s.engine().execution_depth().get(), 0);
    assert_eq!(s.editor().beeps(), 0);
}

#[test]
fn calling_the_macro_being_appended_to_is_refused() {
    let mut s = session();
    s.press_keys("C-x ( a C-x )").expect("record");
    s.press_keys("C-u C-x ( b").expect("append");

    let err = s.press_keys("<f4>").unwrap_err();
    assert_eq!(err.code, ErrorCode::AlreadyDefining);
    assert_eq!(s.engine().recording().to_compact(), "a, <minibuffer-exit>, b");

    s.press_keys("C-x )").expect("end");
    assert_eq!(s.editor().text(), "ab");
    assert_eq!(current(&s), "a, <minibuffer-exit>, b, <minibuffer-exit>");
}

#[test]
fn unbound_keys_leave_nothing_to_replay() {
    let mut s = session();
    s.press_keys("C-x ( a").expect("start");
    let err = s.press_keys("C-x C-q").unwrap_err();
    assert_eq!(err.code, ErrorCode::NotHandled);
    s.press_keys("b C-x )").expect("end");
    assert_eq!(s.editor().text(), "ab");
    assert_eq!(current(&s), "a, b, <minibuffer-exit>");

    *s.editor_mut() = ScratchEditor::default();
    s.execute_current(1).expect("replay");
    assert_eq!(s.editor().text(), "ab");
}

#[test]
fn end_and_call_then_repeat() {
    let mut s = session();
    s.press_keys("C-x ( a b C-x e").expect("end and call");
    assert_eq!(s.editor().text(), "abab");
    s.press_keys("C-u 3 C-x e").expect("call three times");
    assert_eq!(s.editor().text(), "ababababab");
}

#[test]
fn failing_command_is_dropped_from_definition() {
    let mut s = session();
    s.press_keys("C-x ( a C-b").expect("record");
    let err = s.press_keys("C-b").unwrap_err();
    assert_eq!(err.code, ErrorCode::CommandFailed);
    s.press_keys("C-x )").expect("end");
    assert_eq!(current(&s), "a, <minibuffer-exit>, backward-char, <minibuffer-exit>");
}

#[test]
fn append_extends_current_macro() {
    let mut s = session();
    s.press_keys("C-x ( a C-x )").expect("record");
    s.press_keys("C-u C-x ( b C-x )").expect("append");
    assert_eq!(current(&s), "a, <minibuffer-exit>, b, <minibuffer-exit>");
    assert_eq!(s.engine().history().len(), 1);

    *s.editor_mut() = ScratchEditor::default();
    s.execute_current(2).expect("replay");
    assert_eq!(s.editor().text(), "abab");
}

#[test]
fn extended_command_records_only_the_command() {
    let mut s = session_with_text("hi");
    s.editor_mut().set_caret(0);
    s.press_keys("C-x ( M-x").expect("prompt");
    s.type_text("upcase-word").expect("name");
    s.press_keys("RET C-x )").expect("run");
    assert_eq!(s.editor().text(), "HI");
    assert_eq!(current(&s), "upcase-word, <minibuffer-exit>");
}

#[test]
fn keyboard_quit_in_prompt_leaves_no_trace() {
    let mut s = session();
    s.press_keys("C-x ( a M-x f o C-g b C-x )").expect("record");
    assert_eq!(s.editor().text(), "ab");
    assert_eq!(current(&s), "a, b, <minibuffer-exit>");
}

#[test]
fn auto_inserted_character_replays_with_or_without_pairing() {
    let mut s = session();
    s.editor_mut().set_auto_pair(true);
    s.press_keys("C-x ( ( x C-x )").expect("record");
    assert_eq!(s.editor().text(), "(x)");
    assert_eq!(current(&s), "(, kmacro-insert-matched[text=)], x, <minibuffer-exit>");

    *s.editor_mut() = ScratchEditor::default();
    s.execute_current(1).expect("replay plain");
    assert_eq!(s.editor().text(), "(x)");

    let mut paired = ScratchEditor::default();
    paired.set_auto_pair(true);
    *s.editor_mut() = paired;
    s.execute_current(1).expect("replay paired");
    assert_eq!(s.editor().text(), "(x)");
}

#[test]
fn interrupt_stops_replay() {
    let mut s = session_with_text("zz");
    s.editor_mut().set_caret(0);
    s.press_keys("C-x ( C-f a C-x )").expect("record");
    assert_eq!(s.editor().text(), "zaz");

    let mut editor = ScratchEditor::default().with_text("zz");
    editor.set_caret(0);
    editor.interrupt_on("forward-char");
    *s.editor_mut() = editor;

    let err = s.execute_current(1).unwrap_err();
    assert_eq!(err.code, ErrorCode::Interrupted);
    assert_eq!(s.editor().text(), "zz");
    assert_eq!(s.editor().caret(), 1);
    assert_eq!(s.editor().beeps(), 1);
}

#[test]
fn saved_macros_load_into_a_new_engine() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut s = stored_session(dir.path(), EngineConfig::default());
    s.press_keys("C-x ( g o C-x )").expect("record");
    s.engine_mut()
        .name_current_with_binding("go", Some("C-c g".into()))
        .expect("name");
    let path = s.engine().save("go").expect("save");
    assert!(path.ends_with("kmacro-go.jsonl"));

    let mut fresh = stored_session(dir.path(), EngineConfig::default());
    assert_eq!(
        fresh
            .engine_mut()
            .load_from_storage(AutoLoadPolicy::Subset(vec!["go".into()]))
            .expect("schedule"),
        1
    );
    assert!(fresh.engine().lookup("go").is_none());
    fresh.run_deferred();

    assert_eq!(fresh.engine().lookup("go"), s.engine().lookup("go"));
    let entry = fresh.engine().registry().entry("go").expect("entry");
    assert_eq!(entry.binding_hint.as_deref(), Some("C-c g"));

    fresh.engine_mut().delete("go").expect("delete");
    assert!(!dir.path().join("kmacro-go.jsonl").exists());
    assert_eq!(fresh.engine_mut().delete("go").unwrap_err().code, ErrorCode::MacroNotFound);
}

#[test]
fn batch_load_reports_failures_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let storage = MacroStorage::with_dir(dir.path()).expect("storage");
    let log = EventLog::from_events(vec![MacroEvent::command("newline", None)]);
    storage.save("first", &log, None).expect("save");
    storage.save("second", &log, None).expect("save");
    std::fs::write(dir.path().join("kmacro-broken.jsonl"), "not json\n").expect("write");
    std::fs::write(dir.path().join("notes.txt"), "ignored").expect("write");

    let mut s = ScratchSession::new(MacroEngine::with_storage(EngineConfig::default(), storage));
    let scheduled = s
        .engine_mut()
        .load_from_storage(AutoLoadPolicy::All)
        .expect("schedule");
    assert_eq!(scheduled, 3);
    assert_eq!(s.engine().pending_deferred(), 4);

    assert_eq!(s.run_deferred(), 4);
    assert_eq!(s.engine().completions().keys().collect::<Vec<_>>(), vec!["first", "second"]);

    let failures = s.editor().load_failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].name, "broken");
    assert_eq!(failures[0].error.code, ErrorCode::Storage);
    assert_eq!(s.editor().messages(), &["1 keyboard macro(s) failed to load: broken".to_string()]);
}

#[test]
fn configured_policy_falls_back_to_none() {
    let dir = tempfile::tempdir().expect("tempdir");
    let storage = MacroStorage::with_dir(dir.path()).expect("storage");
    storage
        .save("kept", &EventLog::from_events(vec![MacroEvent::MinibufferExit]), None)
        .expect("save");

    let config = EngineConfig { auto_load: "sometimes".into(), ..Default::default() };
    let mut s = stored_session(dir.path(), config);
    assert_eq!(s.engine_mut().load_configured().expect("load"), 0);
    assert_eq!(s.engine().pending_deferred(), 0);

    let config = EngineConfig {
        auto_load: "named".into(),
        auto_load_names: vec!["kept".into(), "missing".into()],
        ..Default::default()
    };
    let mut s = stored_session(dir.path(), config);
    assert_eq!(s.engine_mut().load_configured().expect("load"), 2);
    s.run_deferred();
    assert!(s.engine().lookup("kept").is_some());
    assert_eq!(s.editor().load_failures()[0].name, "missing");
}
