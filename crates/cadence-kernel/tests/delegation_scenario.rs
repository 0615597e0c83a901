use cadence_kernel::{AgentIdentity, Kernel, KernelConfig};
use cadence_kernel_governance::{DelegationResponse, RejectionReason};
use cadence_kernel_log::LogKind;
use cadence_types::{AgentId, AgentState, DelegationRequest, PermissionGrant, PolicyDecision};

fn count(kernel: &Kernel, kind: LogKind) -> usize {
    kernel
        .log()
        .entries()
        .iter()
        .filter(|e| e.kind() == kind)
        .count()
}

#[test]
fn root_child_grandchild_then_cascade() {
    let kernel = Kernel::new(KernelConfig::default()).unwrap();
    let root = AgentId::from("root");
    kernel
        .spawn_agent(
            AgentIdentity::new("root", "orchestrator"),
            vec![PermissionGrant::new("*", "*")],
        )
        .unwrap();

    let ttl = kernel.log().now_ms() + 10_000;
    let child = kernel
        .delegate(DelegationRequest::new(
            root.clone(),
            vec![PermissionGrant::new("read", "logs")],
            5,
            ttl,
        ))
        .unwrap();
    assert!(child.is_accepted());
    let child = child.child().cloned().unwrap();
    assert_eq!(kernel.lifecycle().state(&child), AgentState::Active);

    let escape = kernel
        .delegate(DelegationRequest::new(
            child.clone(),
            vec![PermissionGrant::new("write", "logs")],
            4,
            ttl,
        ))
        .unwrap();
    assert_eq!(
        escape,
        DelegationResponse::Rejected {
            reason: RejectionReason::GrantsEscapeBounds
        }
    );
    assert!(RejectionReason::GrantsEscapeBounds
        .to_string()
        .contains("escape parent bounds"));

    let grandchild = kernel
        .delegate(DelegationRequest::new(
            child.clone(),
            vec![PermissionGrant::new("read", "logs/specific")],
            4,
            ttl,
        ))
        .unwrap();
    assert!(grandchild.is_accepted());
    let grandchild = grandchild.child().cloned().unwrap();

    // the rejection left neither a node nor a log entry behind
    assert_eq!(kernel.delegation().children(&child), vec![grandchild.clone()]);
    assert_eq!(count(&kernel, LogKind::DelegationIssued), 2);

    assert_eq!(
        kernel.authorize(&grandchild, "read", "logs/specific").unwrap(),
        PolicyDecision::Allow
    );
    assert_eq!(
        kernel.authorize(&grandchild, "read", "logs").unwrap(),
        PolicyDecision::Deny
    );

    let revoked = kernel.revoke(&root).unwrap();
    assert_eq!(revoked, 3);
    for agent in [&root, &child, &grandchild] {
        assert!(kernel.delegation().token(agent).unwrap().revoked);
    }
    assert_eq!(count(&kernel, LogKind::DelegationRevoked), 3);
    assert_eq!(
        kernel.authorize(&grandchild, "read", "logs/specific").unwrap(),
        PolicyDecision::Deny
    );

    // revocation is idempotent
    assert_eq!(kernel.revoke(&root).unwrap(), 0);
}

#[test]
fn child_bounds_are_enforced() {
    let kernel = Kernel::new(KernelConfig::default()).unwrap();
    let root = AgentId::from("root");
    kernel
        .spawn_agent(
            AgentIdentity::new("root", "orchestrator"),
            vec![PermissionGrant::new("read", "data")],
        )
        .unwrap();
    let ttl = kernel.log().now_ms() + 10_000;
    let child = kernel
        .delegate(DelegationRequest::new(
            root,
            vec![PermissionGrant::new("read", "data")],
            1,
            ttl,
        ))
        .unwrap()
        .child()
        .cloned()
        .unwrap();

    let too_deep = kernel
        .delegate(DelegationRequest::new(
            child.clone(),
            vec![PermissionGrant::new("read", "data")],
            1,
            ttl,
        ))
        .unwrap();
    assert_eq!(
        too_deep,
        DelegationResponse::Rejected {
            reason: RejectionReason::DepthExceeded
        }
    );

    let too_long = kernel
        .delegate(DelegationRequest::new(
            child,
            vec![PermissionGrant::new("read", "data")],
            0,
            ttl + 1,
        ))
        .unwrap();
    assert_eq!(
        too_long,
        DelegationResponse::Rejected {
            reason: RejectionReason::TtlExceeded
        }
    );
    assert_eq!(count(&kernel, LogKind::DelegationIssued), 1);
}

#[test]
fn unknown_parent_is_rejected() {
    let kernel = Kernel::new(KernelConfig::default()).unwrap();
    let response = kernel
        .delegate(DelegationRequest::new(
            AgentId::from("ghost"),
            vec![],
            1,
            u64::MAX,
        ))
        .unwrap();
    assert_eq!(
        response,
        DelegationResponse::Rejected {
            reason: RejectionReason::ParentNotFound
        }
    );
    assert!(kernel.log().is_empty());
}
