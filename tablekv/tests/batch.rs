//! Batch builder: pipelined and atomic execution framing, reply alignment,
//! and in-place error replies.

mod common;

use common::*;
use tablekv::{Registry, RespValue, Table};

async fn registry_for(addr: &str) -> std::sync::Arc<Registry> {
    let registry = Registry::new();
    registry.connect("master", single(addr)).await.expect("connect");
    registry
}

#[tokio::test]
async fn pipeline_runs_commands_in_order() {
    let addr = spawn(|idx, args| match idx {
        0 => simple("PONG"),
        1 => {
            assert_cmd(&args, &["SET", "orders:1", "a"]);
            simple("OK")
        }
        2 => {
            assert_cmd(&args, &["HSET", "orders:1", "state", "paid"]);
            int(1)
        }
        3 => {
            assert_cmd(&args, &["GET", "orders:1"]);
            bulk(b"a")
        }
        _ => panic!("unexpected command"),
    })
    .await;

    let registry = registry_for(&addr).await;
    let orders = Table::open(&registry, "orders").expect("open");

    let mut batch = orders.batch();
    batch
        .set_value("1", b"a", None)
        .set_hash_value("1", "state", b"paid")
        .get_value("1");
    assert_eq!(batch.len(), 3);

    let replies = batch.run_pipeline().await.expect("pipeline");
    assert_eq!(
        replies,
        vec![
            RespValue::Simple(b"OK".to_vec()),
            RespValue::Integer(1),
            RespValue::Bulk(Some(b"a".to_vec())),
        ]
    );
}

#[tokio::test]
async fn pipeline_surfaces_per_command_errors_in_place() {
    let addr = spawn(|idx, args| match idx {
        0 => simple("PONG"),
        1 => {
            assert_cmd(&args, &["GET", "orders:1"]);
            err("WRONGTYPE not a string")
        }
        2 => {
            assert_cmd(&args, &["DEL", "orders:1"]);
            int(1)
        }
        _ => panic!("unexpected command"),
    })
    .await;

    let registry = registry_for(&addr).await;
    let orders = Table::open(&registry, "orders").expect("open");

    let mut batch = orders.batch();
    batch.get_value("1").del_key("1");
    let replies = batch.run_pipeline().await.expect("pipeline");
    assert!(replies[0].is_error());
    assert_eq!(replies[1], RespValue::Integer(1));
}

#[tokio::test]
async fn atomic_wraps_commands_in_multi_exec() {
    let addr = spawn(|idx, args| match idx {
        0 => simple("PONG"),
        1 => {
            assert_cmd(&args, &["MULTI"]);
            simple("OK")
        }
        2 => {
            assert_cmd(&args, &["SET", "orders:1", "a"]);
            simple("QUEUED")
        }
        3 => {
            assert_cmd(&args, &["EXPIRE", "orders:1", "60"]);
            simple("QUEUED")
        }
        4 => {
            assert_cmd(&args, &["EXEC"]);
            array(&[simple("OK"), int(1)])
        }
        _ => panic!("unexpected command"),
    })
    .await;

    let registry = registry_for(&addr).await;
    let orders = Table::open(&registry, "orders").expect("open");

    let mut batch = orders.batch();
    batch.set_value("1", b"a", None).set_key_timeout("1", 60);
    let replies = batch.run_atomic().await.expect("atomic");
    assert_eq!(
        replies,
        vec![RespValue::Simple(b"OK".to_vec()), RespValue::Integer(1)]
    );
}

#[tokio::test]
async fn empty_batch_is_a_no_op() {
    let addr = spawn(|idx, _args| match idx {
        0 => simple("PONG"),
        _ => panic!("empty batch must not reach the server"),
    })
    .await;

    let registry = registry_for(&addr).await;
    let orders = Table::open(&registry, "orders").expect("open");

    let batch = orders.batch();
    assert!(batch.is_empty());
    assert!(batch.run_pipeline().await.expect("pipeline").is_empty());
    assert!(orders.batch().run_atomic().await.expect("atomic").is_empty());
}
