//! Folds a stream-event sequence into a completed assistant message.

use crate::stream::{StopReason, StreamEvent, Usage};
use crate::types::{ChatMessage, ToolCallData};

#[derive(Debug, Default)]
pub struct StreamAccumulator {
    text: String,
    tool_calls: Vec<ToolCallData>,
    stop: Option<StopReason>,
    usage: Option<Usage>,
}

impl StreamAccumulator {
    pub fn process(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::TextDelta { text } => self.text.push_str(text),
            StreamEvent::ToolCallStart { index, id, name } => {
                while self.tool_calls.len() <= *index {
                    self.tool_calls.push(ToolCallData {
                        id: String::new(),
                        name: String::new(),
                        arguments: String::new(),
                    });
                }
                let call = &mut self.tool_calls[*index];
                call.id = id.clone();
                call.name = name.clone();
            }
            StreamEvent::ToolCallDelta { index, fragment } => {
                while self.tool_calls.len() <= *index {
                    self.tool_calls.push(ToolCallData {
                        id: String::new(),
                        name: String::new(),
                        arguments: String::new(),
                    });
                }
                self.tool_calls[*index].arguments.push_str(fragment);
            }
            StreamEvent::Stop { reason, usage } => {
                self.stop = Some(*reason);
                self.usage = *usage;
            }
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn tool_calls(&self) -> &[ToolCallData] {
        &self.tool_calls
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop
    }

    pub fn usage(&self) -> Option<Usage> {
        self.usage
    }

    pub fn into_message(self) -> ChatMessage {
        ChatMessage::assistant_with_calls(self.text, self.tool_calls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_text_and_interleaved_tool_calls() {
        let mut acc = StreamAccumulator::default();
        acc.process(&StreamEvent::TextDelta {
            text: "Let me ".into(),
        });
        acc.process(&StreamEvent::TextDelta {
            text: "edit that.".into(),
        });
        acc.process(&StreamEvent::ToolCallStart {
            index: 0,
            id: "call_1".into(),
            name: "write_file".into(),
        });
        acc.process(&StreamEvent::ToolCallDelta {
            index: 0,
            fragment: "{\"path\":".into(),
        });
        acc.process(&StreamEvent::ToolCallDelta {
            index: 0,
            fragment: "\"a.txt\"}".into(),
        });
        acc.process(&StreamEvent::Stop {
            reason: StopReason::ToolUse,
            usage: Some(Usage {
                input_tokens: 10,
                output_tokens: 4,
            }),
        });

        assert_eq!(acc.text(), "Let me edit that.");
        assert_eq!(acc.stop_reason(), Some(StopReason::ToolUse));
        let message = acc.into_message();
        let calls = message.tool_calls.expect("calls");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "write_file");
        assert_eq!(calls[0].arguments, "{\"path\":\"a.txt\"}");
    }

    #[test]
    fn batched_tool_calls_keep_document_order() {
        let mut acc = StreamAccumulator::default();
        for (index, name) in [(0usize, "first"), (1, "second")] {
            acc.process(&StreamEvent::ToolCallStart {
                index,
                id: format!("call_{index}"),
                name: name.into(),
            });
            acc.process(&StreamEvent::ToolCallDelta {
                index,
                fragment: "{}".into(),
            });
        }
        let calls = acc.into_message().tool_calls.expect("calls");
        assert_eq!(calls[0].name, "first");
        assert_eq!(calls[1].name, "second");
    }
}
