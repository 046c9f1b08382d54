use std::thread;

use gpucap::addr::{
    DescriptorHandleRange, DescriptorHeapType, HandleInfo, HandleKind, ObjectKey, ResolvedAddress,
    ResourceUsage,
};
use gpucap::record::{SchedulerConfig, SinkEvent, VecSink};
use gpucap::{CaptureConfig, CaptureContext};
use pretty_assertions::assert_eq;

/// What an interception layer would write for a call carrying a GPU address.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Command {
    CopyFrom(ResolvedAddress),
    BindDescriptor(HandleInfo),
    Present,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[test]
fn config_deserializes_with_defaults() {
    let cfg: CaptureConfig =
        serde_json::from_str(r#"{"scheduler": {"thread_name": "rec"}}"#).unwrap();
    assert_eq!(
        cfg,
        CaptureConfig {
            scheduler: SchedulerConfig {
                thread_name: "rec".to_string(),
                ..SchedulerConfig::default()
            }
        }
    );
    let empty: CaptureConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(empty, CaptureConfig::default());
}

#[test]
fn commands_embed_logical_keys_and_arrive_in_issue_order() {
    init_tracing();
    let ctx = CaptureContext::new(VecSink::new(), CaptureConfig::default()).unwrap();

    ctx.addresses()
        .register_heap(ObjectKey(10), 0x1000, 0x2000)
        .unwrap();
    ctx.addresses()
        .register_placed(ObjectKey(11), ObjectKey(10), 0x1000, 0x800, ResourceUsage::Buffer)
        .unwrap();
    ctx.descriptors()
        .create_heap(
            DescriptorHandleRange::with_count(
                ObjectKey(20),
                DescriptorHeapType::CbvSrvUav,
                HandleKind::Gpu,
                0x8000_0000,
                64,
                32,
            )
            .unwrap(),
        )
        .unwrap();

    let copy_key = ctx.begin_command();
    let bind_key = ctx.begin_command();
    let failed_key = ctx.begin_command();
    let present_key = ctx.begin_command();

    let handle = ctx.handle();
    // Issue from another thread in reverse so everything but the first command is buffered.
    let addresses = std::sync::Arc::clone(ctx.addresses());
    let descriptors = std::sync::Arc::clone(ctx.descriptors());
    thread::spawn(move || {
        handle.frame_end(present_key).unwrap();
        handle.record(present_key, Command::Present).unwrap();
        handle.skip(failed_key).unwrap();

        let info = descriptors
            .get_handle_info(DescriptorHeapType::CbvSrvUav, HandleKind::Gpu, 0x8000_0000 + 5 * 32)
            .unwrap();
        handle.record(bind_key, Command::BindDescriptor(info)).unwrap();

        let resolved = addresses.resolve(0x1200, None).unwrap();
        handle.record(copy_key, Command::CopyFrom(resolved)).unwrap();
    })
    .join()
    .unwrap();

    let sink = ctx.finish().unwrap();
    assert_eq!(
        sink.events,
        vec![
            SinkEvent::Command {
                key: copy_key,
                payload: Command::CopyFrom(ResolvedAddress {
                    key: ObjectKey(11),
                    offset: 0x200,
                    heap: Some(ObjectKey(10)),
                }),
            },
            SinkEvent::Command {
                key: bind_key,
                payload: Command::BindDescriptor(HandleInfo {
                    owner: ObjectKey(20),
                    index: 5,
                }),
            },
            SinkEvent::Command {
                key: present_key,
                payload: Command::Present,
            },
            SinkEvent::FrameEnd,
        ]
    );
}

#[test]
fn heap_release_cascades_for_later_commands() {
    let ctx = CaptureContext::new(VecSink::<()>::new(), CaptureConfig::default()).unwrap();
    let addresses = ctx.addresses();
    addresses.register_heap(ObjectKey(10), 0x1000, 0x2000).unwrap();
    addresses
        .register_placed(ObjectKey(11), ObjectKey(10), 0x1000, 0x800, ResourceUsage::Texture)
        .unwrap();
    assert!(addresses.release(ObjectKey(10)));
    assert_eq!(addresses.resolve(0x1200, None), None);
    assert_eq!(addresses.placed(ObjectKey(11)), None);

    let key = ctx.begin_command();
    ctx.handle().skip(key).unwrap();
    let sink = ctx.finish().unwrap();
    assert!(sink.events.is_empty());
}

#[test]
fn key_allocator_follows_configured_first_key() {
    let config = CaptureConfig {
        scheduler: SchedulerConfig {
            first_key: 1_000,
            ..SchedulerConfig::default()
        },
    };
    let ctx = CaptureContext::new(VecSink::new(), config).unwrap();
    let first = ctx.begin_command();
    let second = ctx.begin_command();
    assert_eq!((first, second), (1_000, 1_001));

    let handle = ctx.handle();
    handle.record(second, "b").unwrap();
    handle.record(first, "a").unwrap();
    handle.flush().unwrap();
    assert_eq!(ctx.stats().delivered, 2);

    let sink = ctx.finish().unwrap();
    assert_eq!(sink.keys(), vec![1_000, 1_001]);
}
