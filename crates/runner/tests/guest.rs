mod common;

use std::time::Duration;

use common::{Guest, Harness, SOURCE_KEY, message};
use sourcebridge::{
    Error, Image, SettingValue, SettingsStore, UnknownImports,
    model::{
        Home, HomeComponent, HomeComponentValue, HomePartialResult, IdKind, ImageRequest,
        ImageResponse, Link, Manga, MangaPageResult, Page, PageContent,
    },
};
use sourcebridge_codec::to_bytes;

const STD_IMPORTS: [&str; 2] = [
    r#"(import "std" "buffer_len" (func $buffer_len (param i32) (result i32)))"#,
    r#"(import "std" "read_buffer" (func $read_buffer (param i32 i32 i32) (result i32)))"#,
];

fn with_std(mut guest: Guest) -> Guest {
    for import in STD_IMPORTS {
        guest = guest.import(import);
    }
    guest
}

fn encoded<T: serde::Serialize>(value: &T) -> Vec<u8> {
    to_bytes(value).expect("encode").to_vec()
}

/// Echoes the buffer behind its first argument back as the result payload.
const ECHO: &str = r#"(func (export "handle_id_migration") (param $id i32) (param $kind i32) (result i32)
    (local $len i32)
    (if (i32.eq (local.get $kind) (i32.const 1)) (then (return (i32.const -2))))
    (local.set $len (call $buffer_len (local.get $id)))
    (i32.store (i32.const 4096) (i32.add (local.get $len) (i32.const 8)))
    (drop (call $read_buffer (local.get $id) (i32.const 4104) (local.get $len)))
    (i32.const 4096))"#;

fn search_guest() -> Guest {
    let mut page = MangaPageResult::default();
    page.entries.push(Manga::new("k", "t"));
    page.has_next_page = true;
    with_std(Guest::new())
        .item(
            r#"(func (export "get_search_manga_list") (param $q i32) (param $page i32) (param $f i32) (result i32)
    (if (i32.eq (local.get $page) (i32.const 0)) (then (return (i32.const -2))))
    (if (i32.eq (local.get $page) (i32.const 1)) (then (return (i32.const -3))))
    (if (i32.eq (local.get $page) (i32.const 2)) (then (return (i32.const -1))))
    (if (i32.eq (local.get $page) (i32.const 3)) (then (return (i32.const 2048))))
    (if (i32.eq (local.get $page) (i32.const 5))
        (then (if (i32.ne (call $buffer_len (local.get $q)) (i32.const 5))
            (then (return (i32.const -1))))))
    (if (i32.eq (local.get $page) (i32.const 6))
        (then (if (i32.ne (call $buffer_len (local.get $q)) (i32.const 0))
            (then (return (i32.const -1))))))
    (i32.const 1024))"#,
        )
        .result(1024, &encoded(&page))
        .data(2048, &message("rate limited"))
}

#[test]
fn negative_returns_map_to_error_kinds() {
    let harness = Harness::new();
    let mut source = harness.load(&search_guest()).expect("load");

    assert!(matches!(
        source.get_search_manga_list(None, 0, &[]),
        Err(Error::Unimplemented)
    ));
    assert!(matches!(
        source.get_search_manga_list(None, 1, &[]),
        Err(Error::Transport)
    ));
    assert!(matches!(
        source.get_search_manga_list(None, 2, &[]),
        Err(Error::MissingResult)
    ));
    assert!(harness.frees.take().is_empty());
}

#[test]
fn message_buffer_becomes_error_and_is_freed() {
    let harness = Harness::new();
    let mut source = harness.load(&search_guest()).expect("load");

    match source.get_search_manga_list(None, 3, &[]) {
        Err(Error::Message(text)) => assert_eq!(text, "rate limited"),
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(harness.frees.take(), [2048]);
}

#[test]
fn payload_is_decoded_stamped_and_freed_once() {
    let harness = Harness::new();
    let mut source = harness.load(&search_guest()).expect("load");

    let result = source
        .get_search_manga_list(Some("hello"), 5, &[])
        .expect("search");
    assert!(result.has_next_page);
    assert_eq!(result.entries.len(), 1);
    assert_eq!(result.entries[0].key, "k");
    assert_eq!(result.entries[0].source_key, SOURCE_KEY);
    assert_eq!(harness.frees.take(), [1024]);
    // Arguments are released once the call returns.
    assert!(source.context().arena().lock().is_empty());
}

#[test]
fn missing_query_is_passed_as_empty_text() {
    let harness = Harness::new();
    let mut source = harness.load(&search_guest()).expect("load");

    let result = source.get_search_manga_list(None, 6, &[]).expect("search");
    assert_eq!(result.entries.len(), 1);
    assert!(source.context().arena().lock().is_empty());
}

#[test]
fn buffers_round_trip_through_std_namespace() {
    let harness = Harness::new();
    let mut source = harness
        .load(&with_std(Guest::new()).item(ECHO))
        .expect("load");

    assert_eq!(
        source
            .handle_id_migration("legacy-42", IdKind::Manga)
            .expect("echo"),
        "legacy-42"
    );
    assert!(matches!(
        source.handle_id_migration("x", IdKind::Chapter),
        Err(Error::Unimplemented)
    ));
    assert!(source.context().arena().lock().is_empty());
}

#[test]
fn features_follow_exports() {
    let harness = Harness::new();
    let guest = Guest::new()
        .item(r#"(func (export "get_base_url") (result i32) (i32.const 1024))"#)
        .result(1024, &encoded(&Some("https://x.test/")));
    let mut source = harness.load(&guest).expect("load");

    let features = source.features();
    assert!(features.provides_base_url);
    assert!(!features.provides_home);
    assert_eq!(
        source.get_base_url().expect("base url").map(String::from),
        Some("https://x.test/".to_string())
    );
    assert!(matches!(source.get_home(), Err(Error::Unimplemented)));
    assert!(matches!(
        source.get_listings(),
        Err(Error::Unimplemented)
    ));
}

#[test]
fn missing_required_export_fails_load() {
    let harness = Harness::new();
    let err = harness
        .load(&Guest::new().omit("get_page_list"))
        .expect_err("load should fail");
    assert!(matches!(err, Error::Link { name, .. } if name == "get_page_list"));
}

#[test]
fn unknown_imports_follow_policy() {
    let harness = Harness::new();
    let guest =
        Guest::new().import(r#"(import "net" "websocket" (func $ws (param i32) (result i32)))"#);

    let err = harness.load(&guest).expect_err("rejected");
    assert!(matches!(err, Error::Link { name, .. } if name == "net.websocket"));

    let config = harness.config().unknown_imports(UnknownImports::Trap);
    assert!(harness.load_with(&guest, config).is_ok());
}

fn component(title: &str) -> HomeComponent {
    HomeComponent {
        title: Some(title.to_string()),
        subtitle: None,
        value: HomeComponentValue::Links(vec![Link {
            title: "more".to_string(),
            subtitle: None,
            image_url: None,
            value: None,
        }]),
    }
}

fn home_guest(partial: &[u8], final_home: &Home) -> Guest {
    Guest::new()
        .import(r#"(import "env" "send_partial_result" (func $partial (param i32)))"#)
        .item(
            r#"(func (export "get_home") (result i32)
    (call $partial (i32.const 1024))
    (i32.const 2048))"#,
        )
        .result(1024, partial)
        .result(2048, &encoded(final_home))
}

#[test]
fn empty_home_falls_back_to_streamed_layout() {
    let harness = Harness::new();
    let partial = encoded(&HomePartialResult::Component(component("A")));
    let mut source = harness
        .load(&home_guest(&partial, &Home::default()))
        .expect("load");
    let updates = source.subscribe_home_updates();

    let home = source.get_home().expect("home");
    assert_eq!(home.components, [component("A")]);
    assert_eq!(updates.borrow().as_ref(), Some(&home));
    assert_eq!(harness.frees.take(), [2048]);
    assert!(source.context().partials().is_empty());
}

#[test]
fn final_home_wins_when_not_empty() {
    let harness = Harness::new();
    let partial = encoded(&HomePartialResult::Component(component("A")));
    let final_home = Home {
        components: vec![component("B")],
    };
    let mut source = harness.load(&home_guest(&partial, &final_home)).expect("load");

    assert_eq!(source.get_home().expect("home"), final_home);
}

#[test]
fn undecodable_partial_fails_the_call() {
    let harness = Harness::new();
    let mut source = harness
        .load(&home_guest(&[9], &Home::default()))
        .expect("load");

    assert!(matches!(source.get_home(), Err(Error::Decode(_))));
    // The final buffer is still handed back.
    assert_eq!(harness.frees.take(), [2048]);
}

#[test]
fn manga_update_streams_merged_partials() {
    let harness = Harness::new();
    let partial = Manga::new("k", "partial");
    let mut finished = Manga::new("k", "final");
    finished.chapters = Some(Vec::new());
    let guest = Guest::new()
        .import(r#"(import "env" "send_partial_result" (func $partial (param i32)))"#)
        .item(
            r#"(func (export "get_manga_update") (param i32 i32 i32) (result i32)
    (call $partial (i32.const 1024))
    (i32.const 2048))"#,
        )
        .result(1024, &encoded(&partial))
        .result(2048, &encoded(&finished));
    let mut source = harness.load(&guest).expect("load");
    let updates = source.subscribe_manga_updates();

    let mut original = Manga::new("k", "old");
    original.description = Some("kept".to_string());
    let updated = source
        .get_manga_update(&original, true, true)
        .expect("update");

    assert_eq!(updated.title, "final");
    assert_eq!(updated.source_key, SOURCE_KEY);
    let streamed = updates.borrow().clone().expect("partial");
    assert_eq!(streamed.title, "partial");
    assert_eq!(streamed.description.as_deref(), Some("kept"));
    assert_eq!(streamed.source_key, SOURCE_KEY);
}

#[test]
fn processed_image_is_taken_from_arena() {
    let harness = Harness::new();
    let guest = Guest::new()
        .item(r#"(func (export "process_page_image") (param i32 i32) (result i32) (i32.const 1024))"#)
        .result(1024, &encoded(&1_i32));
    let mut source = harness.load(&guest).expect("load");

    let png = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0, 0];
    let image = Image::from_bytes(bytes::Bytes::copy_from_slice(&png)).expect("png");
    let handle = source.store(image.clone());
    assert_eq!(handle, 1);
    let response = ImageResponse {
        code: 200,
        headers: Default::default(),
        request: ImageRequest::default(),
        image: handle,
    };

    let processed = source
        .process_page_image(&response, None)
        .expect("process");
    assert_eq!(processed, Some(image));
    assert!(source.context().arena().lock().is_empty());
}

#[test]
fn non_image_handle_is_still_released() {
    let harness = Harness::new();
    let guest = Guest::new()
        .item(r#"(func (export "process_page_image") (param i32 i32) (result i32) (i32.const 1024))"#)
        .result(1024, &encoded(&1_i32));
    let mut source = harness.load(&guest).expect("load");

    let handle = source.store("not an image");
    assert_eq!(handle, 1);
    let response = ImageResponse {
        code: 200,
        headers: Default::default(),
        request: ImageRequest::default(),
        image: handle,
    };

    assert_eq!(
        source.process_page_image(&response, None).expect("process"),
        None
    );
    assert!(source.context().arena().lock().is_empty());
}

#[test]
fn non_request_handle_is_still_released() {
    let harness = Harness::new();
    let guest = Guest::new()
        .item(r#"(func (export "get_image_request") (param i32 i32) (result i32) (i32.const 1024))"#)
        .result(1024, &encoded(&1_i32));
    let mut source = harness.load(&guest).expect("load");

    assert_eq!(source.store(vec![1_u8, 2, 3]), 1);
    assert!(matches!(
        source.get_image_request("https://x.test/1.png", None),
        Err(Error::MissingResult)
    ));
    assert!(source.context().arena().lock().is_empty());
}

#[test]
fn settings_are_persisted_under_source_key() {
    let harness = Harness::new();
    let guest = with_std(Guest::new())
        .import(r#"(import "defaults" "set" (func $set (param i32 i32 i32 i32) (result i32)))"#)
        .import(r#"(import "defaults" "get" (func $get (param i32 i32) (result i32)))"#)
        .item(
            r#"(func (export "handle_basic_login") (param i32 i32 i32) (result i32)
    (if (i32.ne (call $set (i32.const 512) (i32.const 4) (i32.const 4) (i32.const 768)) (i32.const 0))
        (then (return (i32.const -1))))
    (if (i32.ne (call $get (i32.const 600) (i32.const 7)) (i32.const -2))
        (then (return (i32.const -1))))
    (if (i32.eq (call $buffer_len (call $get (i32.const 512) (i32.const 4))) (i32.const 4))
        (then (return (i32.const 1024))))
    (i32.const 2048))"#,
        )
        .data(512, b"user")
        .data(600, b"missing")
        .result(768, &encoded(&"bob"))
        .result(1024, &encoded(&true))
        .result(2048, &encoded(&false));
    let mut source = harness.load(&guest).expect("load");

    assert!(source.handle_basic_login("login", "u", "p").expect("login"));
    assert_eq!(
        harness.settings.get("test.source.user"),
        Some(SettingValue::String("bob".to_string()))
    );
}

#[test]
fn runaway_guest_times_out() {
    let harness = Harness::new();
    let guest = Guest::new().item(
        r#"(func (export "get_listings") (result i32)
    (loop $spin (br $spin))
    (unreachable))"#,
    );
    let timeout = Duration::from_millis(50);
    let config = harness.config().call_timeout(timeout);
    let mut source = harness.load_with(&guest, config).expect("load");

    assert!(matches!(source.get_listings(), Err(Error::Timeout(t)) if t == timeout));
}

#[test]
fn epoch_tick_is_configurable() {
    let harness = Harness::new();
    let guest = Guest::new().item(
        r#"(func (export "get_listings") (result i32)
    (loop $spin (br $spin))
    (unreachable))"#,
    );
    let timeout = Duration::from_millis(20);
    let config = harness
        .config()
        .call_timeout(timeout)
        .epoch_tick(Duration::from_millis(1));
    let mut source = harness.load_with(&guest, config).expect("load");

    assert!(matches!(source.get_listings(), Err(Error::Timeout(t)) if t == timeout));
    // The deadline is re-armed for every call.
    assert!(matches!(source.get_listings(), Err(Error::Timeout(_))));
}

#[test]
fn abort_traps_and_prints() {
    let harness = Harness::new();
    let guest = Guest::new()
        .import(r#"(import "env" "abort" (func $abort))"#)
        .import(r#"(import "env" "print" (func $print (param i32 i32)))"#)
        .item(r#"(func (export "start") (call $print (i32.const 512) (i32.const 5)))"#)
        .item(r#"(func (export "get_listings") (result i32) (call $abort) (i32.const 0))"#)
        .data(512, b"ready");
    let mut source = harness.load(&guest).expect("load");

    assert!(matches!(source.get_listings(), Err(Error::Wasm(_))));
    assert_eq!(*harness.host.printed.lock(), ["ready", "Aborted"]);
}

#[test]
fn guest_memory_is_capped() {
    let harness = Harness::new();
    let guest = Guest::new().item(
        r#"(func (export "get_listings") (result i32)
    (if (i32.eq (memory.grow (i32.const 16)) (i32.const -1))
        (then (return (i32.const -3))))
    (i32.const -1))"#,
    );
    let config = harness.config().max_memory(4 * 65536);
    let mut source = harness.load_with(&guest, config).expect("load");

    assert!(matches!(source.get_listings(), Err(Error::Transport)));
}

fn fetching_guest() -> Guest {
    with_std(Guest::new())
        .import(r#"(import "std" "destroy" (func $destroy (param i32)))"#)
        .import(r#"(import "net" "init" (func $init (param i32) (result i32)))"#)
        .import(r#"(import "net" "set_url" (func $set_url (param i32 i32 i32) (result i32)))"#)
        .import(r#"(import "net" "set_header" (func $set_header (param i32 i32 i32 i32 i32) (result i32)))"#)
        .import(r#"(import "net" "send" (func $send (param i32) (result i32)))"#)
        .import(r#"(import "net" "get_status_code" (func $status (param i32) (result i32)))"#)
        .import(r#"(import "net" "data_len" (func $data_len (param i32) (result i32)))"#)
        .import(r#"(import "net" "read_data" (func $read_data (param i32 i32 i32) (result i32)))"#)
        .item(
            r#"(func (export "get_page_description") (param i32) (result i32)
    (local $req i32) (local $len i32)
    (local.set $req (call $init (i32.const 0)))
    (drop (call $set_url (local.get $req) (i32.const 512) (i32.const 21)))
    (drop (call $set_header (local.get $req) (i32.const 600) (i32.const 7) (i32.const 640) (i32.const 4)))
    (if (i32.ne (call $send (local.get $req)) (i32.const 0))
        (then (call $destroy (local.get $req)) (return (i32.const -3))))
    (if (i32.ne (call $status (local.get $req)) (i32.const 200))
        (then (call $destroy (local.get $req)) (return (i32.const -1))))
    (local.set $len (call $data_len (local.get $req)))
    (i32.store (i32.const 4096) (i32.add (local.get $len) (i32.const 8)))
    (drop (call $read_data (local.get $req) (i32.const 4104) (local.get $len)))
    (call $destroy (local.get $req))
    (i32.const 4096))"#,
        )
        .data(512, b"https://x.test/page/1")
        .data(600, b"Referer")
        .data(640, b"test")
}

#[test]
fn guest_fetches_through_host() {
    let harness = Harness::new();
    harness
        .host
        .route("https://x.test/page/1", 200, &encoded(&"hello"));
    let mut source = harness.load(&fetching_guest()).expect("load");

    let page = Page::new(PageContent::Text("p".to_string()));
    assert_eq!(source.get_page_description(&page).expect("fetch"), "hello");

    let requests = harness.host.requests.lock();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, http::Method::GET);
    assert_eq!(requests[0].uri.to_string(), "https://x.test/page/1");
    assert_eq!(
        requests[0].headers.get("referer").map(|v| v.as_bytes()),
        Some(&b"test"[..])
    );
    assert!(source.context().arena().lock().is_empty());
}

#[test]
fn failed_request_surfaces_as_transport_error() {
    let harness = Harness::new();
    let mut source = harness.load(&fetching_guest()).expect("load");

    let page = Page::new(PageContent::Text("p".to_string()));
    assert!(matches!(
        source.get_page_description(&page),
        Err(Error::Transport)
    ));
    assert!(source.context().arena().lock().is_empty());
}

#[test]
fn empty_batch_is_rejected() {
    let harness = Harness::new();
    let guest = Guest::new()
        .import(r#"(import "net" "send_all" (func $send_all (param i32 i32) (result i32)))"#)
        .item(
            r#"(func (export "get_page_description") (param i32) (result i32)
    (if (i32.ne (call $send_all (i32.const 512) (i32.const 0)) (i32.const -1))
        (then (return (i32.const -1))))
    (i32.const 1024))"#,
        )
        .result(1024, &encoded(&"rejected"));
    let mut source = harness.load(&guest).expect("load");

    let page = Page::new(PageContent::Text("p".to_string()));
    assert_eq!(source.get_page_description(&page).expect("call"), "rejected");
    assert!(harness.host.requests.lock().is_empty());
}
