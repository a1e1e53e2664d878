use std::path::Path;

use serde_json::{json, Value};
use snapsight_contracts::events::{EventPayload, EventWriter};
use snapsight_contracts::intake::{ImageCandidate, UploadedImage};
use snapsight_contracts::session::{AnalysisCall, Notice, SessionState};
use tracing::{debug, info, warn};

use crate::gateway::{Analysis, AnalysisGateway};
use crate::intake::{candidate_from_bytes, candidates_from_paths, fingerprint, probe_dimensions};

/// What one upload batch did: how many images landed and every notice raised.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    pub added: usize,
    pub notices: Vec<Notice>,
}

/// Drives [`SessionState`] against one gateway and records each transition
/// in the session log.
pub struct Controller {
    state: SessionState,
    gateway: Box<dyn AnalysisGateway>,
    model: String,
    events: EventWriter,
    last_analysis: Option<Analysis>,
}

impl Controller {
    pub fn new(
        gateway: Box<dyn AnalysisGateway>,
        model: impl Into<String>,
        events: EventWriter,
    ) -> Self {
        Self {
            state: SessionState::new(),
            gateway,
            model: model.into(),
            events,
            last_analysis: None,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn gateway_name(&self) -> &str {
        self.gateway.name()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn set_model(&mut self, model: impl Into<String>) {
        self.model = model.into();
    }

    pub fn last_analysis(&self) -> Option<&Analysis> {
        self.last_analysis.as_ref()
    }

    pub fn events(&self) -> &EventWriter {
        &self.events
    }

    pub fn set_query(&mut self, query: impl Into<String>) {
        self.state.set_query(query);
    }

    pub fn set_follow_up(&mut self, follow_up: impl Into<String>) {
        self.state.set_follow_up(follow_up);
    }

    pub fn add_paths<P: AsRef<Path>>(&mut self, paths: &[P]) -> Outcome {
        self.add_batch(paths, Vec::new())
    }

    /// One upload batch of files plus named in-memory buffers, which follow
    /// the files in order.
    pub fn add_batch<P: AsRef<Path>>(
        &mut self,
        paths: &[P],
        buffers: Vec<(String, Vec<u8>)>,
    ) -> Outcome {
        let mut batch = candidates_from_paths(paths);
        for (name, bytes) in buffers {
            match candidate_from_bytes(&name, bytes) {
                Ok(candidate) => batch.candidates.push(candidate),
                Err(notice) => batch.skipped.push(notice),
            }
        }
        self.accept(batch.candidates, batch.skipped)
    }

    fn accept(&mut self, candidates: Vec<ImageCandidate>, skipped: Vec<Notice>) -> Outcome {
        let mut outcome = Outcome::default();
        for notice in skipped {
            self.refused("add_images", &notice);
            outcome.notices.push(notice);
        }

        let before = self.state.images().len();
        match self.state.accept_batch(candidates, probe_dimensions) {
            Ok(0) => {}
            Ok(added) => {
                outcome.added = added;
                let with_digest = self.events.path().is_some();
                let images: Vec<Value> = self.state.images()[before..]
                    .iter()
                    .map(|image| image_summary(image, with_digest))
                    .collect();
                info!(added, total = self.state.images().len(), "images added");
                self.emit(
                    "images_added",
                    payload(json!({
                        "added": added,
                        "total": self.state.images().len(),
                        "images": images,
                    })),
                );
            }
            Err(notice) => {
                warn!(reason = %notice.message, "upload batch rejected");
                self.emit("batch_rejected", payload(json!({ "notice": notice })));
                outcome.notices.push(notice);
            }
        }
        outcome
    }

    /// Analyzes every image with the current query. Returns the new transcript.
    pub fn submit_generate(&mut self) -> Result<&str, Notice> {
        let begun = self.state.begin_generate();
        self.run("generate", begun)?;
        Ok(self.state.transcript().unwrap_or_default())
    }

    /// Asks the current follow-up against every image. Returns the extended transcript.
    pub fn submit_follow_up(&mut self) -> Result<&str, Notice> {
        let begun = self.state.begin_follow_up();
        self.run("follow_up", begun)?;
        Ok(self.state.transcript().unwrap_or_default())
    }

    fn run(&mut self, action: &str, begun: Result<AnalysisCall, Notice>) -> Result<(), Notice> {
        let call = match begun {
            Ok(call) => call,
            Err(notice) => {
                self.refused(action, &notice);
                return Err(notice);
            }
        };

        let turn = call.turn.as_str();
        debug!(
            turn,
            model = %self.model,
            gateway = self.gateway.name(),
            images = call.images.len(),
            "analysis started"
        );
        self.emit(
            "analysis_started",
            payload(json!({
                "turn": turn,
                "model": self.model,
                "gateway": self.gateway.name(),
                "image_count": call.images.len(),
                "instruction_chars": call.instruction.chars().count(),
            })),
        );

        let result = self
            .gateway
            .analyze(&self.model, &call.images, &call.instruction);
        match result {
            Ok(analysis) => {
                self.state.complete::<String>(&call, Ok(analysis.text.clone()))?;
                info!(turn, model = %analysis.model, "analysis completed");
                self.emit(
                    "analysis_completed",
                    payload(json!({
                        "turn": turn,
                        "model": analysis.model,
                        "input_tokens": analysis.input_tokens,
                        "output_tokens": analysis.output_tokens,
                        "transcript_chars": self.state.transcript().map(|text| text.chars().count()),
                    })),
                );
                self.last_analysis = Some(analysis);
                Ok(())
            }
            Err(err) => {
                let kind = err.kind();
                warn!(turn, error_kind = kind, error = %err, "analysis failed");
                let notice = match self.state.complete(&call, Err(err)) {
                    Err(notice) => notice,
                    Ok(()) => Notice::error(Notice::ANALYSIS_FAILED, "gateway failed"),
                };
                self.emit(
                    "analysis_failed",
                    payload(json!({
                        "turn": turn,
                        "error_kind": kind,
                        "notice": notice,
                    })),
                );
                Err(notice)
            }
        }
    }

    fn refused(&self, action: &str, notice: &Notice) {
        debug!(action, title = %notice.title, "action refused");
        self.emit(
            "action_refused",
            payload(json!({ "action": action, "notice": notice })),
        );
    }

    fn emit(&self, event_type: &str, payload: EventPayload) {
        if let Err(err) = self.events.emit(event_type, payload) {
            warn!(event_type, error = %err, "failed to write session event");
        }
    }
}

/// The digest reads the whole body, so it is only taken when a log is written.
fn image_summary(image: &UploadedImage, with_digest: bool) -> Value {
    let preview = image.preview();
    json!({
        "id": image.id().as_str(),
        "name": image.name(),
        "size_bytes": image.size_bytes(),
        "mime": image.mime(),
        "width": preview.dimensions.map(|(width, _)| width),
        "height": preview.dimensions.map(|(_, height)| height),
        "sha256": with_digest.then(|| fingerprint(image).ok()).flatten(),
    })
}

fn payload(value: Value) -> EventPayload {
    match value {
        Value::Object(map) => map,
        _ => EventPayload::new(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::fs::{self, File};
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    use anyhow::Result;
    use snapsight_contracts::session::{NoticeKind, Phase};

    use super::*;
    use crate::error::GatewayError;
    use crate::gateway::DEFAULT_INSTRUCTION;

    const MB: u64 = 1024 * 1024;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct RecordedCall {
        model: String,
        image_names: Vec<String>,
        instruction: String,
    }

    /// Replays scripted replies in order and records what it was asked.
    #[derive(Clone, Default)]
    struct RecordingGateway {
        calls: Arc<Mutex<Vec<RecordedCall>>>,
        replies: Arc<Mutex<VecDeque<Result<String, GatewayError>>>>,
    }

    impl RecordingGateway {
        fn replying(replies: Vec<Result<String, GatewayError>>) -> Self {
            Self {
                calls: Arc::default(),
                replies: Arc::new(Mutex::new(replies.into())),
            }
        }

        fn calls(&self) -> Vec<RecordedCall> {
            self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
        }
    }

    impl AnalysisGateway for RecordingGateway {
        fn name(&self) -> &str {
            "recording"
        }

        fn analyze(
            &self,
            model: &str,
            images: &[UploadedImage],
            instruction: &str,
        ) -> Result<Analysis, GatewayError> {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(RecordedCall {
                    model: model.to_string(),
                    image_names: images.iter().map(|image| image.name().to_string()).collect(),
                    instruction: instruction.to_string(),
                });
            }
            let reply = self
                .replies
                .lock()
                .ok()
                .and_then(|mut replies| replies.pop_front())
                .unwrap_or(Err(GatewayError::EmptyResponse));
            reply.map(|text| Analysis {
                text,
                model: model.to_string(),
                input_tokens: Some(10),
                output_tokens: Some(5),
            })
        }
    }

    struct Fixture {
        _temp: tempfile::TempDir,
        dir: PathBuf,
        events_path: PathBuf,
        gateway: RecordingGateway,
        controller: Controller,
    }

    fn fixture(replies: Vec<Result<String, GatewayError>>) -> Result<Fixture> {
        let temp = tempfile::tempdir()?;
        let dir = temp.path().to_path_buf();
        let events_path = dir.join("events.jsonl");
        let gateway = RecordingGateway::replying(replies);
        let controller = Controller::new(
            Box::new(gateway.clone()),
            "gpt-4o",
            EventWriter::new(&events_path, "session-test"),
        );
        Ok(Fixture {
            _temp: temp,
            dir,
            events_path,
            gateway,
            controller,
        })
    }

    fn sized_file(dir: &Path, name: &str, size: u64) -> Result<PathBuf> {
        let path = dir.join(name);
        File::create(&path)?.set_len(size)?;
        Ok(path)
    }

    fn event_types(path: &Path) -> Result<Vec<String>> {
        let content = fs::read_to_string(path)?;
        let mut types = Vec::new();
        for line in content.lines() {
            let value: Value = serde_json::from_str(line)?;
            types.push(value["type"].as_str().unwrap_or_default().to_string());
        }
        Ok(types)
    }

    #[test]
    fn single_image_with_empty_query_uses_default_instruction_downstream() -> Result<()> {
        let mut fx = fixture(vec![Ok("A cat on a sofa.".to_string())])?;
        let image = sized_file(&fx.dir, "cat.jpg", 2 * MB)?;

        let outcome = fx.controller.add_paths(&[image]);
        assert_eq!(outcome.added, 1);
        let transcript = fx.controller.submit_generate().map_err(|n| anyhow::anyhow!("{n}"))?;
        assert_eq!(transcript, "A cat on a sofa.");

        let calls = fx.gateway.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].image_names, vec!["cat.jpg".to_string()]);
        assert_eq!(calls[0].instruction, "");
        assert_eq!(calls[0].model, "gpt-4o");
        assert_eq!(
            crate::gateway::effective_instruction(&calls[0].instruction),
            DEFAULT_INSTRUCTION
        );
        assert_eq!(fx.controller.last_analysis().and_then(|a| a.output_tokens), Some(5));
        Ok(())
    }

    #[test]
    fn rejected_batch_keeps_earlier_images() -> Result<()> {
        let mut fx = fixture(Vec::new())?;
        let one = sized_file(&fx.dir, "one.png", MB)?;
        let three = sized_file(&fx.dir, "three.png", 3 * MB)?;
        let six = sized_file(&fx.dir, "six.png", 6 * MB)?;

        assert_eq!(fx.controller.add_paths(&[one, three]).added, 2);
        let rejected = fx.controller.add_paths(&[six]);
        assert_eq!(rejected.added, 0);
        assert_eq!(rejected.notices.len(), 1);
        assert_eq!(rejected.notices[0].title, Notice::FILES_TOO_LARGE);

        let names: Vec<&str> = fx
            .controller
            .state()
            .images()
            .iter()
            .map(UploadedImage::name)
            .collect();
        assert_eq!(names, vec!["one.png", "three.png"]);
        assert_eq!(
            event_types(&fx.events_path)?,
            vec!["images_added", "batch_rejected"]
        );
        Ok(())
    }

    #[test]
    fn generate_without_images_never_reaches_gateway() -> Result<()> {
        let mut fx = fixture(vec![Ok("unused".to_string())])?;
        let refused = fx.controller.submit_generate().err();
        assert_eq!(
            refused.map(|notice| notice.kind),
            Some(NoticeKind::Validation)
        );
        assert!(fx.gateway.calls().is_empty());
        assert_eq!(fx.controller.state().phase(), Phase::Idle);
        assert_eq!(event_types(&fx.events_path)?, vec!["action_refused"]);
        Ok(())
    }

    #[test]
    fn follow_up_appends_answer_and_resends_all_images() -> Result<()> {
        let mut fx = fixture(vec![Ok("T1".to_string()), Ok("R2".to_string())])?;
        let a = sized_file(&fx.dir, "a.jpg", 1024)?;
        let b = sized_file(&fx.dir, "b.jpg", 2048)?;
        fx.controller.add_paths(&[a, b]);
        fx.controller.set_query("what breed?");
        fx.controller.submit_generate().map_err(|n| anyhow::anyhow!("{n}"))?;

        fx.controller.set_follow_up("why?");
        let transcript = fx
            .controller
            .submit_follow_up()
            .map_err(|n| anyhow::anyhow!("{n}"))?
            .to_string();

        assert!(transcript.starts_with("T1"));
        assert!(transcript.contains("### Follow-up: why?"));
        assert!(transcript.ends_with("R2"));
        assert_eq!(fx.controller.state().follow_up(), "");

        let calls = fx.gateway.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].instruction, "what breed?");
        assert_eq!(calls[1].instruction, "why?");
        assert_eq!(calls[1].image_names, vec!["a.jpg".to_string(), "b.jpg".to_string()]);
        Ok(())
    }

    #[test]
    fn gateway_failure_leaves_state_and_logs_kind() -> Result<()> {
        let mut fx = fixture(vec![
            Ok("T1".to_string()),
            Err(GatewayError::Authentication {
                status: 401,
                message: "Incorrect API key provided".to_string(),
            }),
        ])?;
        let a = sized_file(&fx.dir, "a.jpg", 1024)?;
        fx.controller.add_paths(&[a]);
        fx.controller.submit_generate().map_err(|n| anyhow::anyhow!("{n}"))?;
        fx.controller.set_follow_up("why?");

        let notice = fx.controller.submit_follow_up().err();
        let Some(notice) = notice else {
            anyhow::bail!("failed follow-up must surface a notice");
        };
        assert_eq!(notice.kind, NoticeKind::Error);
        assert!(notice.message.contains("Incorrect API key provided"));
        assert_eq!(fx.controller.state().transcript(), Some("T1"));
        assert_eq!(fx.controller.state().follow_up(), "why?");
        assert!(!fx.controller.state().is_busy());

        let content = fs::read_to_string(&fx.events_path)?;
        let last: Value = serde_json::from_str(content.lines().last().unwrap_or("{}"))?;
        assert_eq!(last["type"], json!("analysis_failed"));
        assert_eq!(last["error_kind"], json!("authentication"));
        Ok(())
    }

    #[test]
    fn skipped_paths_are_reported_but_do_not_block_the_rest() -> Result<()> {
        let mut fx = fixture(Vec::new())?;
        let ok = sized_file(&fx.dir, "ok.gif", 512)?;
        let text = fx.dir.join("readme.txt");
        fs::write(&text, "hello")?;

        let outcome = fx.controller.add_paths(&[text, ok]);
        assert_eq!(outcome.added, 1);
        assert_eq!(outcome.notices.len(), 1);
        assert_eq!(outcome.notices[0].title, Notice::UNSUPPORTED_FILE);
        assert_eq!(
            event_types(&fx.events_path)?,
            vec!["action_refused", "images_added"]
        );
        Ok(())
    }

    #[test]
    fn event_log_failures_never_fail_the_action() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let blocker = temp.path().join("not-a-dir");
        fs::write(&blocker, "file")?;
        let gateway = RecordingGateway::replying(vec![Ok("fine".to_string())]);
        let mut controller = Controller::new(
            Box::new(gateway),
            "gpt-4o",
            EventWriter::new(blocker.join("events.jsonl"), "session-test"),
        );

        let outcome = add_pixel(&mut controller)?;
        assert_eq!(outcome.added, 1);
        let transcript = controller.submit_generate().map_err(|n| anyhow::anyhow!("{n}"))?;
        assert_eq!(transcript, "fine");
        Ok(())
    }

    #[test]
    fn model_changes_apply_to_the_next_call() -> Result<()> {
        let mut fx = fixture(vec![Ok("x".to_string())])?;
        add_pixel(&mut fx.controller)?;
        fx.controller.set_model("gpt-4o-mini");
        fx.controller.submit_generate().map_err(|n| anyhow::anyhow!("{n}"))?;
        assert_eq!(fx.gateway.calls()[0].model, "gpt-4o-mini");
        Ok(())
    }

    #[test]
    fn files_and_buffers_form_one_batch() -> Result<()> {
        let mut fx = fixture(Vec::new())?;
        let on_disk = sized_file(&fx.dir, "disk.jpg", 1024)?;
        let outcome = fx.controller.add_batch(
            &[on_disk],
            vec![
                ("stdin".to_string(), tiny_png()?),
                ("notes".to_string(), b"plain text".to_vec()),
            ],
        );
        assert_eq!(outcome.added, 2);
        assert_eq!(outcome.notices.len(), 1);
        let names: Vec<&str> = fx
            .controller
            .state()
            .images()
            .iter()
            .map(UploadedImage::name)
            .collect();
        assert_eq!(names, vec!["disk.jpg", "stdin"]);
        Ok(())
    }

    #[test]
    fn image_digest_is_only_taken_for_a_written_log() -> Result<()> {
        let candidate = candidate_from_bytes("pixel.png", tiny_png()?)
            .map_err(|n| anyhow::anyhow!("{n}"))?;
        let image = UploadedImage::from_candidate(candidate, None)?;

        assert_eq!(image_summary(&image, false)["sha256"], Value::Null);
        let digest = image_summary(&image, true)["sha256"]
            .as_str()
            .map(str::len);
        assert_eq!(digest, Some(64));
        Ok(())
    }

    fn add_pixel(controller: &mut Controller) -> Result<Outcome> {
        let no_paths: &[PathBuf] = &[];
        Ok(controller.add_batch(no_paths, vec![("pixel.png".to_string(), tiny_png()?)]))
    }

    fn tiny_png() -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        image::RgbImage::new(1, 1).write_to(
            &mut std::io::Cursor::new(&mut bytes),
            image::ImageFormat::Png,
        )?;
        Ok(bytes)
    }
}
