//! # 流式回复读取
//!
//! 数据流向：字节分块 -> [`decoder`] 增量解码 -> [`framer`] 按行切分
//! -> [`event`] 解析负载 -> 调用方逐个拿到 [`StreamEvent`]。
//!
//! 每次只拉取一个分块，处理完才拉下一个，读取节奏自然跟随网络速度。

pub mod decoder;
pub mod event;
pub mod framer;

use std::collections::VecDeque;
use std::pin::Pin;

use futures_util::{Stream, StreamExt};
use tracing::debug;

use crate::error::ChatError;
use crate::models::StreamEvent;

use self::decoder::Utf8Decoder;
use self::framer::{EventFramer, Frame};

/// `reqwest` 响应体的字节流。
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>>;

/// 把任意字节分块流转换成事件序列。不可重启，读到结束后一直返回 `None`。
pub struct EventStream<S> {
    body: S,
    decoder: Option<Utf8Decoder>,
    framer: EventFramer,
    pending: VecDeque<Frame>,
    finished: bool,
    bytes_read: usize,
}

impl<S, B, E> EventStream<S>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Into<ChatError>,
{
    pub fn new(body: S) -> Self {
        Self {
            body,
            decoder: Some(Utf8Decoder::new()),
            framer: EventFramer::new(),
            pending: VecDeque::new(),
            finished: false,
            bytes_read: 0,
        }
    }

    /// 已读取的原始字节数。
    pub fn bytes_read(&self) -> usize {
        self.bytes_read
    }

    /// 读取下一个事件。
    ///
    /// 返回 `Ok(None)` 表示流已结束（`[DONE]` 或读到末尾）；
    /// 返回 `Err` 表示读取过程中发生了网络层错误，之后流也视为结束。
    pub async fn next_event(&mut self) -> Result<Option<StreamEvent>, ChatError> {
        loop {
            while let Some(frame) = self.pending.pop_front() {
                match frame {
                    Frame::Done => {
                        debug!(bytes = self.bytes_read, "stream reached [DONE]");
                        self.finished = true;
                        self.pending.clear();
                        return Ok(None);
                    }
                    Frame::Data(payload) => {
                        if let Some(event) = event::interpret(&payload) {
                            return Ok(Some(event));
                        }
                    }
                }
            }

            if self.finished {
                return Ok(None);
            }

            match self.body.next().await {
                Some(Ok(chunk)) => {
                    let chunk = chunk.as_ref();
                    self.bytes_read += chunk.len();
                    if let Some(decoder) = self.decoder.as_mut() {
                        let text = decoder.decode(chunk);
                        self.pending.extend(self.framer.push(&text));
                    }
                }
                Some(Err(e)) => {
                    self.finished = true;
                    return Err(e.into());
                }
                None => {
                    debug!(bytes = self.bytes_read, "stream body exhausted");
                    if let Some(decoder) = self.decoder.take() {
                        let tail = decoder.finish();
                        self.pending.extend(self.framer.push(&tail));
                    }
                    self.pending.extend(self.framer.finish());
                    self.finished = true;
                }
            }
        }
    }

    /// 读完整个流，收集所有事件（测试与非交互场景使用）。
    pub async fn collect_events(mut self) -> Result<Vec<StreamEvent>, ChatError> {
        let mut events = Vec::new();
        while let Some(event) = self.next_event().await? {
            events.push(event);
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UpgradeSignal;
    use futures_util::stream;

    fn chunks(parts: &[&[u8]]) -> EventStream<impl Stream<Item = Result<Vec<u8>, ChatError>> + Unpin> {
        let items: Vec<Result<Vec<u8>, ChatError>> = parts.iter().map(|p| Ok(p.to_vec())).collect();
        EventStream::new(stream::iter(items))
    }

    #[tokio::test]
    async fn malformed_payload_is_skipped() {
        let events = chunks(&["data: {invalid json\ndata: {\"content\":\"hello\"}\n".as_bytes()])
            .collect_events()
            .await
            .unwrap();
        assert_eq!(events, vec![StreamEvent::ContentFragment("hello".into())]);
    }

    #[tokio::test]
    async fn same_events_for_every_byte_split() {
        let body = "data: {\"content\":\"Réponse \"}\n\ndata: {\"content\":\"à 100 €\"}\ndata: {\"conversationId\":\"conv-7\"}\ndata: [DONE]\n";
        let bytes = body.as_bytes();
        let expected = chunks(&[bytes]).collect_events().await.unwrap();
        assert_eq!(expected.len(), 3);

        for split in 0..=bytes.len() {
            let events = chunks(&[&bytes[..split], &bytes[split..]])
                .collect_events()
                .await
                .unwrap();
            assert_eq!(events, expected, "split at byte {}", split);
        }
    }

    #[tokio::test]
    async fn nothing_after_done() {
        let mut events = chunks(&[
            "data: {\"content\":\"a\"}\ndata: [DONE]\n".as_bytes(),
            "data: {\"content\":\"b\"}\n".as_bytes(),
        ]);
        assert_eq!(
            events.next_event().await.unwrap(),
            Some(StreamEvent::ContentFragment("a".into()))
        );
        assert_eq!(events.next_event().await.unwrap(), None);
        assert_eq!(events.next_event().await.unwrap(), None);
    }

    #[tokio::test]
    async fn rate_limit_event_is_surfaced() {
        let mut events = chunks(&[
            "data: {\"error\":\"limit_exceeded\",\"current\":20,\"limit\":20,\"tier\":\"basic\"}\n".as_bytes(),
        ]);
        assert_eq!(
            events.next_event().await.unwrap(),
            Some(StreamEvent::RateLimited(UpgradeSignal {
                current: 20,
                limit: 20,
                tier: "basic".into(),
            }))
        );
    }

    #[tokio::test]
    async fn read_error_ends_the_stream() {
        let items: Vec<Result<Vec<u8>, ChatError>> = vec![
            Ok(b"data: {\"content\":\"Bon\"}\n".to_vec()),
            Err(ChatError::Network { status: 502 }),
        ];
        let mut events = EventStream::new(stream::iter(items));
        assert_eq!(
            events.next_event().await.unwrap(),
            Some(StreamEvent::ContentFragment("Bon".into()))
        );
        assert!(matches!(
            events.next_event().await,
            Err(ChatError::Network { status: 502 })
        ));
        assert_eq!(events.next_event().await.unwrap(), None);
        assert_eq!(events.bytes_read(), 24);
    }
}
