use cadence_types::{AgentId, Instruction, TickOutput};

pub const TICK_OVERFLOW: &str = "TICK_OVERFLOW";
pub const UNKNOWN_INSTRUCTION: &str = "UNKNOWN_INSTRUCTION";

/// Interpret one instruction.
///
/// Pure: the same arguments always give the same output. Unknown
/// instructions and a zero step budget are reported as `FAILED` outputs,
/// never as errors.
pub fn run_tick(
    _agent: &AgentId,
    _sequence_number: u64,
    instruction: &Instruction,
    max_steps: u64,
) -> TickOutput {
    if max_steps < 1 {
        return TickOutput::failed(TICK_OVERFLOW);
    }
    match instruction {
        Instruction::Noop => TickOutput::Completed {
            result: serde_json::Value::Null,
        },
        Instruction::Return { value } => TickOutput::Completed {
            result: value.clone(),
        },
        Instruction::CallTool { tool_name, args } => TickOutput::PendingTool {
            tool_name: tool_name.clone(),
            args: args.clone(),
        },
        Instruction::Delegate { target, payload } => TickOutput::PendingDelegation {
            target: target.clone(),
            payload: payload.clone(),
        },
        Instruction::Unknown => TickOutput::failed(UNKNOWN_INSTRUCTION),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn tick(instruction: &Instruction) -> TickOutput {
        run_tick(&AgentId::from("a"), 1, instruction, 100)
    }

    #[test]
    fn dispatches_on_kind() {
        assert_eq!(tick(&Instruction::Noop), TickOutput::Completed { result: json!(null) });
        assert_eq!(
            tick(&Instruction::ret(json!({"ok": true}))),
            TickOutput::Completed { result: json!({"ok": true}) }
        );
        assert_eq!(
            tick(&Instruction::call_tool("echo", json!({"msg": "hi"}))),
            TickOutput::PendingTool {
                tool_name: "echo".into(),
                args: json!({"msg": "hi"})
            }
        );
        assert_eq!(
            tick(&Instruction::delegate("worker", json!([1, 2]))),
            TickOutput::PendingDelegation {
                target: "worker".into(),
                payload: json!([1, 2])
            }
        );
    }

    #[test]
    fn unknown_kind_is_a_failed_output() {
        let instruction: Instruction = serde_json::from_value(json!({"kind": "TELEPORT"})).unwrap();
        assert_eq!(tick(&instruction), TickOutput::failed(UNKNOWN_INSTRUCTION));
    }

    #[test]
    fn zero_step_budget_overflows() {
        let out = run_tick(&AgentId::from("a"), 1, &Instruction::Noop, 0);
        assert_eq!(out, TickOutput::failed(TICK_OVERFLOW));
    }

    proptest! {
        #[test]
        fn run_tick_is_deterministic(value in any::<i64>(), seq in 1u64..1_000, steps in 0u64..3) {
            let agent = AgentId::from("p");
            let instruction = Instruction::ret(json!(value));
            prop_assert_eq!(
                run_tick(&agent, seq, &instruction, steps),
                run_tick(&agent, seq, &instruction, steps)
            );
        }
    }
}
