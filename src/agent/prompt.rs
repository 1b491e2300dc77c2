use indoc::indoc;

use crate::agent::PeerResult;
use crate::schemas::Trace;

pub const SYNTHESIS_PROMPT: &str = indoc! {r#"
    You are answering the request below using the execution trace of a plan
    that already ran. Each trace line is one tool invocation with its status
    and output. Failed or skipped lines carry no output; work with what
    succeeded. Answer the request directly and completely, without
    describing the trace itself.

    <REQUEST>
    {{request}}
    </REQUEST>

    <TRACE>
    {{trace}}
    </TRACE>
"#};

pub const DECOMPOSE_PROMPT: &str = indoc! {r#"
    Split the goal below into at most {{max}} independent sub-tasks. Each
    sub-task must be self-contained: it will be handed to a separate worker
    that cannot see the others. Do not create sequential steps; only
    parallel lines of work.

    Respond with a JSON array of strings, nothing else.

    <GOAL>
    {{goal}}
    </GOAL>
"#};

pub const FLEET_SYNTHESIS_PROMPT: &str = indoc! {r#"
    Workers pursued independent sub-tasks of the goal below. Combine their
    peer results into one coherent final answer to the goal. Some workers
    may have failed; rely on the ones that succeeded.

    <GOAL>
    {{goal}}
    </GOAL>

    <PEER_RESULTS>
    {{results}}
    </PEER_RESULTS>
"#};

pub fn render_synthesis_prompt(request: &str, trace: &Trace) -> String {
    let lines: Vec<String> = trace
        .iter()
        .map(|record| {
            serde_json::json!({
                "node_id": record.node_id,
                "status": record.status,
                "output": record.output,
            })
            .to_string()
        })
        .collect();
    SYNTHESIS_PROMPT
        .replace("{{request}}", request)
        .replace("{{trace}}", &lines.join("\n"))
}

pub fn render_decompose_prompt(goal: &str, max: usize) -> String {
    DECOMPOSE_PROMPT
        .replace("{{max}}", &max.to_string())
        .replace("{{goal}}", goal)
}

pub fn render_fleet_synthesis_prompt(goal: &str, peers: &[PeerResult]) -> String {
    let results: Vec<String> = peers
        .iter()
        .map(|peer| {
            serde_json::json!({
                "task": peer.task,
                "status": if peer.is_success() { "success" } else { "error" },
                "answer": peer.answer,
                "error": peer.error,
            })
            .to_string()
        })
        .collect();
    FLEET_SYNTHESIS_PROMPT
        .replace("{{goal}}", goal)
        .replace("{{results}}", &results.join("\n"))
}
