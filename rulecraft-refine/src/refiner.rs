//! Refiner implementation - drives the generate / evaluate / reformat loop

use crate::document::{LibraryDocument, RuleSet};
use crate::error::{Error, Result};
use crate::prompt::PromptSet;
use rulecraft_llm::{ChatMessage, Gateway};
use rulecraft_trace::{attributes, Attributes, RunGuard, SpanGuard, TraceRecorder, Tracer};
use std::fmt;

/// A prompt/response step of the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Initial,
    Evaluate,
    Reformat,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Initial => "initial",
            Stage::Evaluate => "evaluate",
            Stage::Reformat => "reformat",
        }
    }

    pub fn span_name(&self) -> &'static str {
        match self {
            Stage::Initial => "generate_initial_rules",
            Stage::Evaluate => "evaluate_rules",
            Stage::Reformat => "reformat_rules",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a refinement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Refinement {
    /// Last rules produced
    pub rules: RuleSet,
    /// Evaluate/reformat passes completed
    pub iterations: usize,
    /// Whether the loop stopped because the rules stopped changing
    pub converged: bool,
}

/// The refinement controller.
///
/// Each stage is awaited before the next one is built, since every prompt
/// depends on the previous response. Tracing is optional; without a recorder
/// the tracer records nothing.
pub struct Refiner<'r, G> {
    gateway: G,
    tracer: Tracer<'r>,
    prompts: PromptSet,
}

impl<G: Gateway> Refiner<'static, G> {
    pub fn new(gateway: G) -> Self {
        Self {
            gateway,
            tracer: Tracer::disabled(),
            prompts: PromptSet::default(),
        }
    }
}

impl<'r, G: Gateway> Refiner<'r, G> {
    /// Record runs, spans and artifacts to `recorder`
    pub fn with_recorder<'a>(self, recorder: &'a dyn TraceRecorder) -> Refiner<'a, G> {
        Refiner {
            gateway: self.gateway,
            tracer: Tracer::new(recorder),
            prompts: self.prompts,
        }
    }

    pub fn with_prompts(mut self, prompts: PromptSet) -> Self {
        self.prompts = prompts;
        self
    }

    /// Refine and return only the final rules
    pub async fn refine(&self, document: &LibraryDocument, max_iterations: usize) -> Result<RuleSet> {
        Ok(self.run(document, max_iterations).await?.rules)
    }

    /// Parse `raw` and refine it; an invalid document never reaches the gateway
    pub async fn run_source(&self, raw: &str, max_iterations: usize) -> Result<Refinement> {
        let document = LibraryDocument::parse(raw)?;
        self.run(&document, max_iterations).await
    }

    /// Run the full loop with up to `max_iterations` evaluate/reformat passes
    pub async fn run(&self, document: &LibraryDocument, max_iterations: usize) -> Result<Refinement> {
        let tracer = self.tracer;
        let run = tracer.start_run("refinement", None);
        run.log_param("max_iterations", max_iterations);
        run.log_param("document_chars", document.char_count());
        run.log_param("cells", document.cells().join(","));
        run.log_param("gateway", self.gateway.name());

        let mut root = tracer.start_span(
            "refine_rules",
            None,
            attributes([
                ("max_iterations", max_iterations.to_string()),
                ("document", document.to_text().to_string()),
            ]),
        );

        tracing::info!(
            gateway = self.gateway.name(),
            max_iterations,
            cells = document.cells().len(),
            "starting refinement"
        );

        match self.iterate(&tracer, &run, &root, document, max_iterations).await {
            Ok(refinement) => {
                root.set_output("iterations", refinement.iterations.to_string());
                root.set_output("converged", refinement.converged.to_string());
                root.set_output("final_rules", refinement.rules.as_str());
                root.finish();
                run.finish();

                tracing::info!(
                    iterations = refinement.iterations,
                    converged = refinement.converged,
                    "refinement finished"
                );
                Ok(refinement)
            }
            Err(err) => {
                root.fail(&err);
                run.fail();
                Err(err)
            }
        }
    }

    async fn iterate(
        &self,
        tracer: &Tracer<'r>,
        run: &RunGuard<'_>,
        root: &SpanGuard<'_>,
        document: &LibraryDocument,
        max_iterations: usize,
    ) -> Result<Refinement> {
        let initial = self
            .stage(tracer, root, Stage::Initial, 0, self.prompts.initial_prompt(document))
            .await?;
        run.log_artifact("initial_rules", &initial);

        let mut rules = RuleSet::from(initial);
        let mut iterations = 0;
        let mut converged = false;

        for iteration in 1..=max_iterations {
            let iteration_run = tracer.start_run(&format!("iteration_{}", iteration), Some(run));
            iteration_run.log_param("iteration", iteration);

            let evaluated = self
                .stage(
                    tracer,
                    root,
                    Stage::Evaluate,
                    iteration,
                    self.prompts.evaluation_prompt(rules.as_str(), document),
                )
                .await?;
            iteration_run.log_artifact(&format!("refined_rules_iter_{}", iteration), &evaluated);

            let formatted = self
                .stage(
                    tracer,
                    root,
                    Stage::Reformat,
                    iteration,
                    self.prompts.reformat_prompt(&evaluated),
                )
                .await?;
            iteration_run.log_artifact(&format!("formatted_rules_iter_{}", iteration), &formatted);

            let formatted = RuleSet::from(formatted);
            iterations = iteration;
            converged = formatted.converged_with(&rules);
            iteration_run.log_param("converged", converged);
            iteration_run.finish();

            rules = formatted;
            if converged {
                tracing::info!(iteration, "rules converged, stopping early");
                break;
            }
        }

        Ok(Refinement {
            rules,
            iterations,
            converged,
        })
    }

    /// Send one prompt inside its own span
    async fn stage(
        &self,
        tracer: &Tracer<'r>,
        parent: &SpanGuard<'_>,
        stage: Stage,
        iteration: usize,
        prompt: String,
    ) -> Result<String> {
        let inputs: Attributes = attributes([
            ("iteration", iteration.to_string()),
            ("prompt", prompt.clone()),
        ]);
        let mut span = tracer.start_span(stage.span_name(), Some(parent), inputs);

        tracing::info!(stage = stage.as_str(), iteration, prompt_chars = prompt.len(), "sending prompt");

        let response = self
            .gateway
            .send(vec![ChatMessage::user(prompt)])
            .await
            .and_then(|text| {
                if text.trim().is_empty() {
                    Err(Error::external_service("gateway returned an empty response").permanent())
                } else {
                    Ok(text)
                }
            })
            .map_err(|e| {
                e.with_operation("refiner::stage")
                    .with_context("stage", stage.as_str())
                    .with_context("iteration", iteration.to_string())
            });

        match response {
            Ok(text) => {
                tracing::debug!(stage = stage.as_str(), iteration, response_chars = text.len(), "response received");
                span.set_output("response", text.as_str());
                span.finish();
                Ok(text)
            }
            Err(err) => {
                tracing::warn!(stage = stage.as_str(), iteration, error = %err, "stage failed");
                span.fail(&err);
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use proptest::prelude::*;
    use rulecraft_trace::{FileArtifacts, RunId, RunStatus, SpanId, SpanStatus, TraceLog};
    use std::collections::VecDeque;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    const DOC: &str = "cell X { pg_pin(VDD) {} }";

    /// Gateway that replays a fixed script and records every prompt
    struct Scripted {
        replies: Mutex<VecDeque<Result<String>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<String>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn texts(texts: &[&str]) -> Self {
            Self::new(texts.iter().map(|t| Ok(t.to_string())).collect())
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    impl Gateway for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn send(&self, messages: Vec<ChatMessage>) -> Result<String> {
            self.prompts.lock().unwrap().push(messages[0].content.clone());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(Error::external_service("script exhausted")))
        }
    }

    /// Gateway that always answers with the same text
    struct Constant {
        reply: &'static str,
        calls: Mutex<usize>,
    }

    impl Constant {
        fn new(reply: &'static str) -> Self {
            Self {
                reply,
                calls: Mutex::new(0),
            }
        }
    }

    impl Gateway for Constant {
        fn name(&self) -> &str {
            "constant"
        }

        async fn send(&self, _messages: Vec<ChatMessage>) -> Result<String> {
            *self.calls.lock().unwrap() += 1;
            Ok(self.reply.to_string())
        }
    }

    /// Gateway whose reformat output stops changing at pass `at`
    struct ConvergesAt {
        at: usize,
        calls: Mutex<usize>,
    }

    impl ConvergesAt {
        fn new(at: usize) -> Self {
            Self {
                at,
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    impl Gateway for ConvergesAt {
        fn name(&self) -> &str {
            "converges-at"
        }

        async fn send(&self, _messages: Vec<ChatMessage>) -> Result<String> {
            let mut calls = self.calls.lock().unwrap();
            let call = *calls;
            *calls += 1;
            // Call 0 is the initial prompt, then evaluate/reformat alternate.
            let pass = (call + 1) / 2;
            Ok(match call {
                0 => "r0".to_string(),
                c if c % 2 == 1 => format!("e{}", pass),
                _ => format!("r{}", pass.min(self.at - 1)),
            })
        }
    }

    struct Broken;

    impl TraceRecorder for Broken {
        fn start_run(&self, _name: &str, _parent: Option<RunId>) -> Result<RunId> {
            Err(Error::tracing("recorder offline"))
        }

        fn log_param(&self, _run: RunId, _key: &str, _value: &str) -> Result<()> {
            Err(Error::tracing("recorder offline"))
        }

        fn log_artifact(&self, _run: RunId, _name: &str, _content: &str) -> Result<()> {
            Err(Error::tracing("recorder offline"))
        }

        fn end_run(&self, _run: RunId, _status: RunStatus) -> Result<()> {
            Err(Error::tracing("recorder offline"))
        }

        fn start_span(&self, _name: &str, _parent: Option<SpanId>, _inputs: Attributes) -> Result<SpanId> {
            Err(Error::tracing("recorder offline"))
        }

        fn end_span(&self, _span: SpanId, _status: SpanStatus, _outputs: Attributes) -> Result<()> {
            Err(Error::tracing("recorder offline"))
        }
    }

    fn doc() -> LibraryDocument {
        LibraryDocument::parse(DOC).unwrap()
    }

    fn text_files(dir: &Path) -> Vec<PathBuf> {
        let mut found = Vec::new();
        for entry in std::fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                found.extend(text_files(&path));
            } else if path.extension().map(|ext| ext == "txt").unwrap_or(false) {
                found.push(path);
            }
        }
        found
    }

    #[tokio::test]
    async fn test_constant_reply_converges_after_first_pass() {
        let gateway = Constant::new("Rule 1: ...");
        let log = TraceLog::new();
        let refiner = Refiner::new(&gateway).with_recorder(&log);

        let result = refiner.run(&doc(), 2).await.unwrap();

        assert_eq!(result.rules.as_str(), "Rule 1: ...");
        assert_eq!(result.iterations, 1);
        assert!(result.converged);
        assert_eq!(*gateway.calls.lock().unwrap(), 3);
        assert_eq!(log.artifact_count(), 3);

        let snapshot = log.snapshot();
        assert_eq!(snapshot.runs.len(), 2);
        assert_eq!(snapshot.runs[0].artifacts, vec!["initial_rules".to_string()]);
        assert_eq!(
            snapshot.runs[1].artifacts,
            vec!["refined_rules_iter_1".to_string(), "formatted_rules_iter_1".to_string()]
        );
        assert_eq!(snapshot.runs[1].params.get("iteration").map(String::as_str), Some("1"));
        assert_eq!(snapshot.runs[1].parent, Some(snapshot.runs[0].id));
    }

    #[tokio::test]
    async fn test_zero_iterations_returns_initial_rules() {
        let gateway = Scripted::texts(&["  initial rules  "]);
        let log = TraceLog::new();
        let refiner = Refiner::new(&gateway).with_recorder(&log);

        let result = refiner.run(&doc(), 0).await.unwrap();

        assert_eq!(result.rules.as_str(), "  initial rules  ");
        assert_eq!(result.iterations, 0);
        assert!(!result.converged);
        assert_eq!(gateway.calls(), 1);

        let names: Vec<String> = log.snapshot().spans.iter().map(|s| s.name.clone()).collect();
        assert_eq!(names, vec!["refine_rules", "generate_initial_rules"]);
        assert_eq!(log.artifact_count(), 1);
    }

    #[tokio::test]
    async fn test_runs_all_passes_without_convergence() {
        let gateway = Scripted::texts(&["r0", "e1", "r1", "e2", "r2", "e3", "r3"]);
        let log = TraceLog::new();
        let refiner = Refiner::new(&gateway).with_recorder(&log);

        let result = refiner.run(&doc(), 3).await.unwrap();

        assert_eq!(result.rules.as_str(), "r3");
        assert_eq!(result.iterations, 3);
        assert!(!result.converged);
        assert_eq!(gateway.calls(), 7);

        // 1 + 2k artifacts, 2 + 2k spans
        assert_eq!(log.artifact_count(), 7);
        let snapshot = log.snapshot();
        assert_eq!(snapshot.spans.len(), 8);
        let root = snapshot.roots().next().unwrap();
        assert_eq!(root.name, "refine_rules");
        assert_eq!(snapshot.children(root.id).count(), 7);
        assert_eq!(root.outputs.get("final_rules").map(String::as_str), Some("r3"));
        assert_eq!(root.outputs.get("iterations").map(String::as_str), Some("3"));
        assert!(snapshot.spans.iter().all(|s| s.status == SpanStatus::Ok));
        assert_eq!(log.open_depth(), 0);

        let iteration_2 = &snapshot.runs[2];
        assert_eq!(log.artifact(iteration_2.id, "formatted_rules_iter_2").as_deref(), Some("r2"));
    }

    #[tokio::test]
    async fn test_file_store_keeps_one_directory_per_refinement() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Scripted::texts(&["r0", "e1", "r1", "e2", "r2"]);
        let log = TraceLog::with_store(FileArtifacts::new(dir.path()).unwrap());

        let result = Refiner::new(&gateway).with_recorder(&log).run(&doc(), 2).await.unwrap();
        assert_eq!(result.iterations, 2);
        assert!(!result.converged);

        let top: Vec<PathBuf> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        let snapshot = log.snapshot();
        assert_eq!(top, vec![dir.path().join(&snapshot.runs[0].key)]);
        assert_eq!(text_files(&top[0]).len(), 5);

        let iteration_2 = &snapshot.runs[2];
        let formatted = top[0]
            .join(iteration_2.uuid.to_string())
            .join("artifacts")
            .join("formatted_rules_iter_2.txt");
        assert_eq!(std::fs::read_to_string(formatted).unwrap(), "r2");
    }

    proptest! {
        #[test]
        fn pass_count_is_bounded_and_stops_at_convergence(
            max_iterations in 0usize..8,
            converge_at in 1usize..8,
        ) {
            let gateway = ConvergesAt::new(converge_at);
            let log = TraceLog::new();
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let result = runtime
                .block_on(Refiner::new(&gateway).with_recorder(&log).run(&doc(), max_iterations))
                .unwrap();

            let passes = converge_at.min(max_iterations);
            prop_assert_eq!(result.iterations, passes);
            prop_assert_eq!(result.converged, converge_at <= max_iterations);
            prop_assert_eq!(gateway.calls(), 1 + 2 * passes);
            prop_assert_eq!(log.artifact_count(), 1 + 2 * passes);
            prop_assert_eq!(log.snapshot().spans.len(), 2 + 2 * passes);
            prop_assert_eq!(log.open_depth(), 0);
        }
    }

    #[tokio::test]
    async fn test_prompts_chain_previous_responses() {
        let gateway = Scripted::texts(&["r0", "e1", "r1"]);
        let refiner = Refiner::new(&gateway);

        refiner.run(&doc(), 1).await.unwrap();

        let prompts = gateway.prompts.lock().unwrap();
        assert!(prompts[0].contains(DOC));
        assert!(prompts[1].contains("Below are my generated rules:\nr0\n"));
        assert!(prompts[1].contains(DOC));
        assert!(prompts[2].starts_with("Based on e1,"));
    }

    #[tokio::test]
    async fn test_convergence_ignores_outer_whitespace_only() {
        let gateway = Scripted::texts(&["Rule A", "eval", "\n Rule A \n"]);
        let result = Refiner::new(&gateway).run(&doc(), 5).await.unwrap();
        assert!(result.converged);
        assert_eq!(result.iterations, 1);
        assert_eq!(result.rules.as_str(), "\n Rule A \n");
    }

    #[tokio::test]
    async fn test_failure_in_second_evaluation() {
        let gateway = Scripted::new(vec![
            Ok("r0".into()),
            Ok("e1".into()),
            Ok("r1".into()),
            Err(Error::external_service("502 bad gateway")),
        ]);
        let log = TraceLog::new();
        let refiner = Refiner::new(&gateway).with_recorder(&log);

        let err = refiner.run(&doc(), 2).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ExternalService);
        assert_eq!(err.operation(), "refiner::stage");
        assert_eq!(err.context_value("stage"), Some("evaluate"));
        assert_eq!(err.context_value("iteration"), Some("2"));

        let snapshot = log.snapshot();
        assert_eq!(log.open_depth(), 0);
        assert_eq!(log.artifact_count(), 3);
        assert_eq!(snapshot.runs[0].status, RunStatus::Failed);
        assert_eq!(snapshot.runs[1].status, RunStatus::Finished);
        assert_eq!(snapshot.runs[2].status, RunStatus::Failed);
        assert!(snapshot.runs[2].artifacts.is_empty());

        let failed = snapshot.spans.last().unwrap();
        assert_eq!(failed.name, "evaluate_rules");
        assert_eq!(failed.status, SpanStatus::Error);
        assert!(failed.outputs.get("error").unwrap().contains("502 bad gateway"));
        assert_eq!(snapshot.spans[0].status, SpanStatus::Error);
    }

    #[tokio::test]
    async fn test_empty_response_is_external_service() {
        let gateway = Scripted::texts(&["r0", "   "]);
        let err = Refiner::new(&gateway).run(&doc(), 2).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExternalService);
        assert!(!err.is_retryable());
        assert_eq!(err.context_value("stage"), Some("evaluate"));
        assert_eq!(err.context_value("iteration"), Some("1"));
    }

    #[tokio::test]
    async fn test_initial_failure_leaves_no_artifacts() {
        let gateway = Scripted::new(vec![Err(Error::external_service("refused"))]);
        let log = TraceLog::new();
        let err = Refiner::new(&gateway).with_recorder(&log).run(&doc(), 2).await.unwrap_err();

        assert_eq!(err.context_value("stage"), Some("initial"));
        assert_eq!(log.artifact_count(), 0);
        assert_eq!(log.open_depth(), 0);
        assert_eq!(log.snapshot().spans.len(), 2);
    }

    #[tokio::test]
    async fn test_broken_recorder_does_not_change_result() {
        let script = ["r0", "e1", "r1", "e2", "r1"];

        let plain = Scripted::texts(&script);
        let expected = Refiner::new(&plain).run(&doc(), 4).await.unwrap();

        let traced = Scripted::texts(&script);
        let actual = Refiner::new(&traced).with_recorder(&Broken).run(&doc(), 4).await.unwrap();

        assert_eq!(actual, expected);
        assert_eq!(actual.iterations, 2);
        assert!(actual.converged);
    }

    #[tokio::test]
    async fn test_invalid_document_makes_no_calls() {
        let gateway = Constant::new("unused");
        let refiner = Refiner::new(&gateway);

        for raw in ["", "  \n ", "cell(A) {"] {
            let err = refiner.run_source(raw, 2).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput);
        }
        assert_eq!(*gateway.calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_refine_returns_rules_only() {
        let gateway = Scripted::texts(&["r0", "e1", "r0"]);
        let rules = Refiner::new(&gateway).refine(&doc(), 2).await.unwrap();
        assert_eq!(rules, RuleSet::new("r0"));
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::Initial.span_name(), "generate_initial_rules");
        assert_eq!(Stage::Reformat.to_string(), "reformat");
    }
}
