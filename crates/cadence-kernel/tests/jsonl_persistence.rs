use std::sync::Arc;

use serde_json::{json, Value};

use cadence_kernel::{
    verify_log, AgentIdentity, FnTool, Kernel, KernelConfig, LogConfig, ToolManifest,
};
use cadence_kernel_log::{read_jsonl, ExecutionLog, LogError, SyncMode};
use cadence_types::{AgentId, Instruction, PermissionGrant};

fn config(path: &std::path::Path) -> KernelConfig {
    KernelConfig {
        log: LogConfig {
            path: Some(path.to_path_buf()),
            sync: SyncMode::Immediate,
        },
        ..KernelConfig::default()
    }
}

async fn run(kernel: &Kernel, id: &str) {
    kernel
        .spawn_agent(AgentIdentity::new(id, "worker"), vec![PermissionGrant::all()])
        .unwrap();
    kernel
        .register_tool(
            ToolManifest::new(format!("echo-{id}"), "echo"),
            Arc::new(FnTool::new(|_: &AgentId, args: Value| Ok(args))),
        )
        .unwrap();
    kernel
        .run_agent(
            &AgentId::from(id),
            Instruction::call_tool(format!("echo-{id}"), json!({ "who": id })),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn reopened_log_continues_the_sequence() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kernel.jsonl");

    let first_len = {
        let kernel = Kernel::new(config(&path)).unwrap();
        run(&kernel, "a").await;
        kernel.flush().unwrap();
        kernel.log().len()
    };

    let kernel = Kernel::new(config(&path)).unwrap();
    assert_eq!(kernel.log().len(), first_len);
    assert_eq!(kernel.log().next_seq(), first_len as u64 + 1);
    run(&kernel, "b").await;
    kernel.flush().unwrap();

    let entries = read_jsonl(&path).unwrap();
    assert_eq!(entries.len(), kernel.log().len());
    assert!(entries.windows(2).all(|w| w[0].bus_seq < w[1].bus_seq));
    assert_eq!(entries[0].bus_seq, 1);

    let report = verify_log(
        Arc::new(ExecutionLog::from_entries(entries).unwrap()),
        &KernelConfig::default(),
        None,
    )
    .await
    .unwrap();
    assert_eq!(report.agents.len(), 2);
    assert!(report.is_clean());
}

#[test]
fn corrupt_line_is_reported_with_its_number() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.jsonl");
    std::fs::write(&path, "{not json}\n").unwrap();

    match Kernel::new(config(&path)) {
        Err(cadence_kernel::KernelError::Log(LogError::Corrupt { line, .. })) => {
            assert_eq!(line, 1)
        }
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("corrupt log accepted"),
    }
}
