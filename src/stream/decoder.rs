//! 增量 UTF-8 解码。
//!
//! 网络分块可能恰好切在一个多字节字符中间，这里借助 `encoding_rs` 的
//! 有状态解码器保留不完整的字节序列，并在下一个分块到来时继续解码。

use encoding_rs::{CoderResult, Decoder, UTF_8};

pub struct Utf8Decoder {
    inner: Decoder,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self {
            // 不做 BOM 处理：流中的每个字节都原样交给上层
            inner: UTF_8.new_decoder_without_bom_handling(),
        }
    }

    /// 解码一个分块，末尾不完整的多字节序列留到下一次调用。
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.decode_inner(chunk, false)
    }

    /// 流结束时调用，冲刷残留字节（残缺序列会变成 U+FFFD）。
    pub fn finish(mut self) -> String {
        self.decode_inner(&[], true)
    }

    fn decode_inner(&mut self, mut bytes: &[u8], last: bool) -> String {
        let capacity = self
            .inner
            .max_utf8_buffer_length(bytes.len())
            .unwrap_or(bytes.len() * 3 + 4);
        let mut out = String::with_capacity(capacity);

        loop {
            let (result, read, _had_errors) = self.inner.decode_to_string(bytes, &mut out, last);
            bytes = &bytes[read..];
            match result {
                CoderResult::InputEmpty => break,
                // 理论上容量已足够，保险起见扩容后继续
                CoderResult::OutputFull => out.reserve(bytes.len() * 3 + 4),
            }
        }
        out
    }
}

impl Default for Utf8Decoder {
    fn default() -> Self {
        Self::new()
    }
}
