/// One command block: a tag followed by `;`-separated instances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Block {
    pub line: usize,
    pub tag: String,
    pub instances: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct UnterminatedQuote {
    pub line: usize,
}

#[derive(Default)]
struct Splitter {
    blocks: Vec<Block>,
    instances: Vec<Vec<String>>,
    tokens: Vec<String>,
    current: String,
    seen_token_content: bool,
    block_line: usize,
}

impl Splitter {
    fn end_token(&mut self) {
        if self.seen_token_content || !self.current.is_empty() {
            self.tokens.push(std::mem::take(&mut self.current));
            self.seen_token_content = false;
        }
    }

    fn end_instance(&mut self) {
        self.end_token();
        self.instances.push(std::mem::take(&mut self.tokens));
    }

    fn end_block(&mut self, next_line: usize) {
        self.end_instance();
        let mut instances = std::mem::take(&mut self.instances);
        let line = self.block_line;
        self.block_line = next_line;

        if instances.iter().all(Vec::is_empty) {
            return;
        }
        let tag = match instances.first_mut() {
            Some(first) if !first.is_empty() => first.remove(0),
            _ => String::new(),
        };
        if instances.len() > 1 {
            instances.retain(|instance| !instance.is_empty());
        }
        self.blocks.push(Block {
            line,
            tag,
            instances,
        });
    }
}

/// Splits a frame script into blocks, instances and tokens.
///
/// Single quotes group text containing spaces, `;` or newlines into one token.
/// `\'` is a literal quote; any other backslash pair is kept as written. `''` is an
/// empty token.
pub(crate) fn split_script(script: &str) -> Result<Vec<Block>, UnterminatedQuote> {
    let mut splitter = Splitter {
        block_line: 1,
        ..Splitter::default()
    };
    let mut line = 1;
    let mut in_quotes = false;
    let mut quote_line = 1;
    let mut chars = script.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\\' => {
                splitter.seen_token_content = true;
                match chars.next() {
                    Some('\'') => splitter.current.push('\''),
                    Some(next) => {
                        if next == '\n' {
                            line += 1;
                        }
                        splitter.current.push('\\');
                        splitter.current.push(next);
                    }
                    None => splitter.current.push('\\'),
                }
            }
            '\'' => {
                in_quotes = !in_quotes;
                quote_line = line;
                splitter.seen_token_content = true;
            }
            '\n' => {
                line += 1;
                if in_quotes {
                    splitter.current.push(ch);
                } else {
                    splitter.end_block(line);
                }
            }
            ';' if !in_quotes => splitter.end_instance(),
            ' ' | '\t' | '\r' if !in_quotes => splitter.end_token(),
            _ => {
                splitter.current.push(ch);
                splitter.seen_token_content = true;
            }
        }
    }

    if in_quotes {
        return Err(UnterminatedQuote { line: quote_line });
    }
    splitter.end_block(line);
    Ok(splitter.blocks)
}
