//! 按行切分解码后的文本，识别 `data: ` 前缀的事件记录。
//!
//! 一个分块可能在一条记录中间结束，因此需要跨分块保留未完成的行。

/// 事件行前缀。
pub const DATA_PREFIX: &str = "data: ";
/// 流结束哨兵。
pub const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// `data: ` 之后的负载，交给事件解释器。
    Data(String),
    /// 收到 `[DONE]`，之后的内容全部忽略。
    Done,
}

#[derive(Debug, Default)]
pub struct EventFramer {
    buffer: String,
    done: bool,
}

impl EventFramer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// 追加一段文本，返回其中所有完整行产生的帧。
    pub fn push(&mut self, text: &str) -> Vec<Frame> {
        let mut frames = Vec::new();
        if self.done {
            return frames;
        }
        self.buffer.push_str(text);

        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            if let Some(frame) = self.frame_line(&line) {
                frames.push(frame);
                if self.done {
                    self.buffer.clear();
                    break;
                }
            }
        }
        frames
    }

    /// 输入结束：最后一行即使没有换行符也按完整行处理。
    pub fn finish(&mut self) -> Vec<Frame> {
        if self.done || self.buffer.is_empty() {
            return Vec::new();
        }
        let line = std::mem::take(&mut self.buffer);
        self.frame_line(&line).into_iter().collect()
    }

    fn frame_line(&mut self, line: &str) -> Option<Frame> {
        let line = line.trim();
        // 空行（keep-alive）、注释和其它字段静默忽略
        let payload = line.strip_prefix(DATA_PREFIX)?;
        if payload == DONE_SENTINEL {
            self.done = true;
            return Some(Frame::Done);
        }
        Some(Frame::Data(payload.to_string()))
    }
}
