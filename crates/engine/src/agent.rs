//! Agent and team construction.
//!
//! Agents are built explicitly at pipeline assembly: name, role, system
//! prompt, bound tool subset, optional model override. The team is rooted
//! at a coordinator — the only agent that may hand off; specialists run
//! their tools and return control.

use dq_domain::chat::ToolDefinition;

/// Tool-name prefix the coordinator uses to hand a task to a member.
pub const DELEGATE_PREFIX: &str = "delegate_to_";

/// One role-bound agent.
#[derive(Debug, Clone)]
pub struct AgentSpec {
    pub name: String,
    /// Short role description shown to the coordinator.
    pub role: String,
    pub system_prompt: String,
    /// Names of the registry tools this agent may call.
    pub tools: Vec<String>,
    /// Model override; `None` inherits the team model.
    pub model: Option<String>,
}

impl AgentSpec {
    fn new(
        name: &str,
        role: &str,
        system_prompt: impl Into<String>,
        tools: &[&str],
    ) -> Self {
        Self {
            name: name.to_string(),
            role: role.to_string(),
            system_prompt: system_prompt.into(),
            tools: tools.iter().map(|t| t.to_string()).collect(),
            model: None,
        }
    }
}

/// A coordinator-rooted team.
#[derive(Debug, Clone)]
pub struct Team {
    pub coordinator: AgentSpec,
    pub specialists: Vec<AgentSpec>,
    /// Default model (provider/model reference) for every member without
    /// an override.
    pub model: String,
}

impl Team {
    /// The standard analytical team.
    pub fn standard(model: impl Into<String>) -> Self {
        let specialists = vec![
            AgentSpec::new(
                "data_discovery",
                "Finds and loads the user's datasets",
                "You locate the data a question needs. Check what is already loaded in the \
                 conversation context first — do not re-fetch data that is already available. \
                 Use list_user_datasets to see what exists and get_dataset_data_from_sql to \
                 load what is missing. Report what you loaded and its shape.",
                &["list_user_datasets", "get_dataset_data_from_sql"],
            ),
            AgentSpec::new(
                "gap_analysis",
                "Finds underrepresented topics in clustered feedback",
                "You analyze cluster coverage. Run detect_gaps_from_clusters on the requested \
                 dataset (it clusters first when needed) and explain which topics are \
                 underrepresented, how many outliers there are, and how concentrated the top \
                 clusters are.",
                &["detect_gaps_from_clusters", "cluster_dataset"],
            ),
            AgentSpec::new(
                "trend_analysis",
                "Finds how metrics move over time",
                "You analyze temporal trends. Run analyze_temporal_trends on the requested \
                 dataset and summarize which metrics are increasing, decreasing, or stable, \
                 with the bucket granularity that was chosen.",
                &["analyze_temporal_trends"],
            ),
            AgentSpec::new(
                "sentiment_analysis",
                "Judges sentiment across reviews",
                "You assess sentiment. Use semantic_search to pull representative reviews when \
                 the context has none, then characterize the overall sentiment and notable \
                 negative themes, quoting short evidence.",
                &["semantic_search"],
            ),
            AgentSpec::new(
                "clustering",
                "Groups text rows into semantic clusters",
                "You cluster datasets. Run cluster_dataset on the requested dataset and \
                 describe the clusters you found, including how many rows fell out as noise.",
                &["cluster_dataset"],
            ),
            AgentSpec::new(
                "visualization",
                "Builds chart configs from analysis results",
                "You turn analysis results into chart configurations with \
                 build_visualization. Pick the chart type that fits the data shape and keep \
                 titles specific.",
                &["build_visualization"],
            ),
            AgentSpec::new(
                "report_writer",
                "Writes the final synthesis with citations",
                "You write concise analytical summaries. When sources were used, assemble a \
                 citation block with format_citations and append it.",
                &["format_citations"],
            ),
            AgentSpec::new(
                "general_assistant",
                "Answers general questions without tools",
                "You answer general questions directly and concisely. You have no tools.",
                &[],
            ),
        ];

        let roster = specialists
            .iter()
            .map(|s| format!("- {}: {}", s.name, s.role))
            .collect::<Vec<_>>()
            .join("\n");

        let coordinator = AgentSpec {
            name: "coordinator".into(),
            role: "Routes work across the team and synthesizes the answer".into(),
            system_prompt: format!(
                "You coordinate a team of analytical specialists working over the user's \
                 datasets and review corpora. Break the question into steps, delegate each \
                 step with the delegate_to_* tools, and synthesize a final answer from what \
                 the team reports. Delegate one task at a time and wait for its result. If a \
                 step fails, adapt: try a different specialist or narrower task, and when the \
                 data genuinely cannot support an answer, say so plainly.\n\nTeam:\n{roster}",
            ),
            tools: Vec::new(),
            model: None,
        };

        Self {
            coordinator,
            specialists,
            model: model.into(),
        }
    }

    pub fn specialist(&self, name: &str) -> Option<&AgentSpec> {
        self.specialists.iter().find(|s| s.name == name)
    }

    /// Delegation tool definitions exposed to the coordinator, one per
    /// specialist.
    pub fn delegation_tools(&self) -> Vec<ToolDefinition> {
        self.specialists
            .iter()
            .map(|s| ToolDefinition {
                name: format!("{DELEGATE_PREFIX}{}", s.name),
                description: format!("Hand a task to the {} specialist: {}.", s.name, s.role),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "task": {
                            "type": "string",
                            "description": "The task or question for this specialist"
                        }
                    },
                    "required": ["task"]
                }),
            })
            .collect()
    }
}
