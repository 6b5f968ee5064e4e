use std::collections::HashMap;

use super::error::MinifyError;
use super::tokenizer::{RawText, Token, Tokenizer};

const DEFAULT_VERBATIM_TAG: &str = "pre";

#[derive(Debug, Clone)]
pub struct MinifyOptions {
    /// Re-emit comments instead of dropping them.
    pub include_comments: bool,
    /// Elements whose text content is copied without whitespace collapsing.
    pub verbatim_tags: Vec<String>,
}

impl Default for MinifyOptions {
    fn default() -> Self {
        Self {
            include_comments: false,
            verbatim_tags: vec![DEFAULT_VERBATIM_TAG.to_string()],
        }
    }
}

impl MinifyOptions {
    pub fn with_comments(include_comments: bool) -> Self {
        Self {
            include_comments,
            ..Self::default()
        }
    }

    fn is_verbatim(&self, name: &str) -> bool {
        self.verbatim_tags
            .iter()
            .any(|tag| tag.eq_ignore_ascii_case(name))
    }
}

/// Minify a complete document in one call.
pub fn minify(markup: &str, options: &MinifyOptions) -> Result<String, MinifyError> {
    let mut minifier = Minifier::new(options.clone());
    minifier.feed(markup)?;
    minifier.close()
}

/// Single-use streaming minifier.
///
/// Feed any number of chunks, then [`close`](Self::close) to obtain the
/// output. Closing (or failing) resets every piece of session state.
///
/// The verbatim flag is a plain boolean: a stray closing `</pre>` inside a
/// `<pre>` region ends the region early.
#[derive(Debug)]
pub struct Minifier {
    options: MinifyOptions,
    output: String,
    pending: String,
    consumed: usize,
    in_verbatim: bool,
    raw_text: Option<RawText>,
    // lowercase name -> casing seen on the first start tag
    casing: HashMap<String, String>,
}

impl Minifier {
    pub fn new(options: MinifyOptions) -> Self {
        Self {
            options,
            output: String::new(),
            pending: String::new(),
            consumed: 0,
            in_verbatim: false,
            raw_text: None,
            casing: HashMap::new(),
        }
    }

    pub fn feed(&mut self, markup: &str) -> Result<(), MinifyError> {
        self.pending.push_str(markup);
        self.drain(false).inspect_err(|_| self.reset())
    }

    pub fn close(&mut self) -> Result<String, MinifyError> {
        let result = self.drain(true).map(|()| std::mem::take(&mut self.output));
        self.reset();
        result
    }

    fn reset(&mut self) {
        self.output.clear();
        self.pending.clear();
        self.consumed = 0;
        self.in_verbatim = false;
        self.raw_text = None;
        self.casing.clear();
    }

    fn drain(&mut self, at_eof: bool) -> Result<(), MinifyError> {
        let buffer = std::mem::take(&mut self.pending);
        let mut tokenizer = Tokenizer::resume(&buffer, at_eof, self.raw_text, self.consumed);

        for token in tokenizer.by_ref() {
            self.handle(token?);
        }

        let used = tokenizer.position();
        self.raw_text = tokenizer.raw_text();
        self.consumed += used;
        self.pending.push_str(&buffer[used..]);
        Ok(())
    }

    fn handle(&mut self, token: Token<'_>) {
        match token {
            Token::StartTag { name, raw, .. } => self.start_tag(name, raw),
            Token::EndTag { name } => self.end_tag(name),
            Token::Text(text) if self.in_verbatim => self.output.push_str(text),
            Token::Text(text) => push_collapsed(&mut self.output, text),
            Token::Comment(body) => {
                if self.options.include_comments {
                    self.output.push_str("<!--");
                    self.output.push_str(body);
                    self.output.push_str("-->");
                }
            }
            Token::Declaration(body) => {
                self.output.push_str("<!");
                self.output.push_str(body);
                self.output.push('>');
            }
            Token::ProcessingInstruction(raw) => self.output.push_str(raw),
            Token::CharRef(body) => {
                self.output.push_str("&#");
                self.output.push_str(body);
                self.output.push(';');
            }
            Token::EntityRef(name) => {
                self.output.push('&');
                self.output.push_str(name);
                self.output.push(';');
            }
        }
    }

    fn start_tag(&mut self, name: &str, raw: &str) {
        if self.options.is_verbatim(name) {
            self.in_verbatim = true;
        }
        self.casing
            .entry(name.to_ascii_lowercase())
            .or_insert_with(|| name.to_string());
        self.output.push_str(raw);
    }

    fn end_tag(&mut self, name: &str) {
        if self.options.is_verbatim(name) {
            self.in_verbatim = false;
        }
        let cased = self
            .casing
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
            .unwrap_or(name);
        self.output.push_str("</");
        self.output.push_str(cased);
        self.output.push('>');
    }
}

fn is_markup_whitespace(ch: char) -> bool {
    matches!(ch, ' ' | '\t' | '\n' | '\r' | '\x0b' | '\x0c')
}

fn push_collapsed(output: &mut String, text: &str) {
    let mut in_run = false;
    for ch in text.chars() {
        if is_markup_whitespace(ch) {
            if !in_run {
                output.push(' ');
                in_run = true;
            }
        } else {
            output.push(ch);
            in_run = false;
        }
    }
}
