/// Section appended to the transcript for one answered follow-up.
pub fn follow_up_section(question: &str, answer: &str) -> String {
    format!("\n\n---\n\n### Follow-up: {question}\n\n{answer}")
}

pub fn append_follow_up(transcript: &str, question: &str, answer: &str) -> String {
    let mut out = String::with_capacity(transcript.len() + question.len() + answer.len() + 32);
    out.push_str(transcript);
    out.push_str(&follow_up_section(question, answer));
    out
}
