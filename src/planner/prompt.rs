use indoc::indoc;

use crate::tools::ToolRegistry;

pub const PLANNER_SYSTEM_PROMPT: &str = indoc! {r#"
    You are a planning compiler. You translate one user request into a
    complete execution plan over the tools listed below, as a single JSON
    object. The plan is executed exactly as written; no further decisions are
    made at runtime, so it must be self-contained.

    <OUTPUT_FORMAT>
    {
        "nodes": [
            {
                "id": (int), unique, numbered densely from 0,
                "tool": (string), MUST BE one of [{{tool_names}}],
                "inputs": (object), arguments matching the tool's parameters,
                "depends_on": [(int)], ids of nodes whose outputs this node needs,
                "retry": (int, optional), extra attempts on recoverable failure,
                "timeout": (number, optional), seconds allowed for this node,
                "on_fail": "halt" | "continue",
                "metadata": {"purpose": (string), why this node exists}
            }
        ],
        "final_output_node": (int), the id whose output answers the request
    }
    </OUTPUT_FORMAT>

    <RULES>
    - Respond with the JSON object only. No prose before or after.
    - Use only the tools listed below, with their exact names.
    - Provide every required input of a tool; respect declared types.
    - To pass one node's output into another, write the string "$<id>"
      (for example "$0") as the input value and list that id in depends_on.
      A "$<id>" embedded in a longer string is replaced by the output's text.
    - Never use template placeholders such as {{...}}; values flow only
      through depends_on edges.
    - depends_on must not form cycles, and a node must not depend on itself.
    - When the request asks for a written narrative (a report, summary, or
      explanation), final_output_node must be a synthesis tool, and every
      additional synthesis node must depend on the synthesis node before it.
    - Set on_fail to "halt" when later nodes are meaningless without this
      one; use "continue" when the plan should tolerate its failure.
    </RULES>

    The following is the description of the tools available to you:
    {{tools}}
"#};

pub const REPAIR_PROMPT: &str = indoc! {r#"
    The plan you produced was rejected by the validator.

    <ERROR>
    {{error}}
    </ERROR>

    Produce a corrected plan that fixes this error. Keep everything that was
    already valid. Respond with the complete JSON object only.
"#};

pub const SYNTAX_REPAIR_PROMPT: &str = indoc! {r#"
    Your response could not be parsed as JSON: {{error}}.
    Re-emit the same plan as one syntactically valid JSON object. Do not
    change its content. Respond with the JSON only, no code fences, no prose.
"#};

pub fn render_system_prompt(registry: &ToolRegistry) -> String {
    PLANNER_SYSTEM_PROMPT
        .replace("{{tool_names}}", &registry.names().join(", "))
        .replace("{{tools}}", &registry.catalog_description())
}

pub fn render_repair_prompt(error: &str) -> String {
    REPAIR_PROMPT.replace("{{error}}", error)
}

pub fn render_syntax_repair_prompt(error: &str) -> String {
    SYNTAX_REPAIR_PROMPT.replace("{{error}}", error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_registry;

    #[test]
    fn test_system_prompt_embeds_catalog() {
        let registry = test_registry();
        let prompt = render_system_prompt(&registry);
        assert!(prompt.contains("web_search"));
        assert!(prompt.contains("llm_synthesize"));
        assert!(!prompt.contains("{{tools}}"));
        assert!(!prompt.contains("{{tool_names}}"));
    }
}
