//! Valve KeyValues text parser.
//!
//! The decoder only meets KeyValues as the trailing ragdoll description in
//! `.phy` files, but the format is the same tree-of-pairs used by `.vmt`
//! and friends: a key followed by either a quoted/bare string or a `{}`
//! block, with `//` line comments. Parsing is tolerant; anything past a
//! syntax problem is dropped rather than failing the caller.

#[derive(Debug, Clone, PartialEq)]
pub enum KvValue {
    String(String),
    Block(KvBlock),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct KvBlock {
    pub pairs: Vec<(String, KvValue)>,
}

impl KvBlock {
    pub fn get(&self, key: &str) -> Option<&KvValue> {
        self.pairs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.get(key) {
            Some(KvValue::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn get_f32(&self, key: &str) -> Option<f32> {
        self.get_str(key)?.trim().parse().ok()
    }

    pub fn get_i32(&self, key: &str) -> Option<i32> {
        let s = self.get_str(key)?.trim();
        // Some exporters write integers as "1.000000".
        s.parse::<i32>()
            .ok()
            .or_else(|| s.parse::<f32>().ok().map(|f| f as i32))
    }

    /// All sub-blocks stored under `key`, in document order.
    pub fn blocks<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a KvBlock> {
        self.pairs.iter().filter_map(move |(k, v)| match v {
            KvValue::Block(b) if k.eq_ignore_ascii_case(key) => Some(b),
            _ => None,
        })
    }
}

#[derive(Debug, PartialEq)]
enum Token {
    String(String),
    Open,
    Close,
}

struct Lexer<'a> {
    bytes: &'a [u8],
    at: usize,
}

impl<'a> Lexer<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            bytes: text.as_bytes(),
            at: 0,
        }
    }

    fn next(&mut self) -> Option<Token> {
        loop {
            while let Some(&b) = self.bytes.get(self.at) {
                if b.is_ascii_whitespace() || b == 0 {
                    self.at += 1;
                } else {
                    break;
                }
            }
            match self.bytes.get(self.at)? {
                b'/' if self.bytes.get(self.at + 1) == Some(&b'/') => {
                    while let Some(&b) = self.bytes.get(self.at) {
                        self.at += 1;
                        if b == b'\n' {
                            break;
                        }
                    }
                }
                b'{' => {
                    self.at += 1;
                    return Some(Token::Open);
                }
                b'}' => {
                    self.at += 1;
                    return Some(Token::Close);
                }
                b'"' => {
                    self.at += 1;
                    let start = self.at;
                    while let Some(&b) = self.bytes.get(self.at) {
                        if b == b'"' {
                            break;
                        }
                        self.at += 1;
                    }
                    let s = String::from_utf8_lossy(&self.bytes[start..self.at]).into_owned();
                    self.at += 1; // closing quote (or end)
                    return Some(Token::String(s));
                }
                _ => {
                    let start = self.at;
                    while let Some(&b) = self.bytes.get(self.at) {
                        if b.is_ascii_whitespace() || b == 0 || matches!(b, b'{' | b'}' | b'"') {
                            break;
                        }
                        self.at += 1;
                    }
                    let s = String::from_utf8_lossy(&self.bytes[start..self.at]).into_owned();
                    return Some(Token::String(s));
                }
            }
        }
    }
}

/// Parse a KeyValues document into its root block.
pub fn parse(text: &str) -> KvBlock {
    let mut lexer = Lexer::new(text);
    parse_block(&mut lexer, true)
}

fn parse_block(lexer: &mut Lexer, top: bool) -> KvBlock {
    let mut block = KvBlock::default();
    loop {
        let key = match lexer.next() {
            Some(Token::String(s)) => s,
            Some(Token::Close) if !top => return block,
            // Stray brace at top level, or a key with no value: tolerate.
            Some(_) => continue,
            None => return block,
        };
        match lexer.next() {
            Some(Token::String(value)) => {
                block.pairs.push((key, KvValue::String(value)));
            }
            Some(Token::Open) => {
                let inner = parse_block(lexer, false);
                block.pairs.push((key, KvValue::Block(inner)));
            }
            // A close (or the end) right after a key: drop the dangling key.
            Some(Token::Close) | None => return block,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ragdoll_shape() {
        let text = r#"
            solid {
                "index" "0"
                "name" "ValveBiped.Bip01_Pelvis"
                "mass" "24.5" // trailing comment
            }
            ragdollconstraint {
                "parent" "0"
                "child" "1"
                "xmin" "-30.000000"
            }
        "#;
        let root = parse(text);
        let solids: Vec<_> = root.blocks("solid").collect();
        assert_eq!(solids.len(), 1);
        assert_eq!(solids[0].get_i32("index"), Some(0));
        assert_eq!(solids[0].get_str("name"), Some("ValveBiped.Bip01_Pelvis"));
        assert_eq!(solids[0].get_f32("mass"), Some(24.5));

        let joint = root.blocks("ragdollconstraint").next().unwrap();
        assert_eq!(joint.get_f32("xmin"), Some(-30.0));
    }

    #[test]
    fn float_formatted_int() {
        let root = parse(r#"solid { "index" "2.000000" }"#);
        assert_eq!(root.blocks("solid").next().unwrap().get_i32("index"), Some(2));
    }

    #[test]
    fn tolerates_trailing_garbage_and_nuls() {
        let root = parse("solid { \"index\" \"0\" }\0\0}");
        assert_eq!(root.blocks("solid").count(), 1);
    }

    #[test]
    fn unterminated_block_keeps_parsed_pairs() {
        let root = parse(r#"solid { "index" "0" "#);
        let solid = root.blocks("solid").next().unwrap();
        assert_eq!(solid.get_i32("index"), Some(0));
    }
}
