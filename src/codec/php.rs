//! Reader for the subset of PHP's `serialize()` output that condition lists
//! were stored in: arrays, strings, integers, floats, booleans and null.
//! Objects and references are refused.

use serde_json::{Map, Number, Value};

use crate::error::Error;

const MAX_DEPTH: usize = 32;

pub(super) fn unserialize(input: &str) -> Result<Value, Error> {
    let mut parser = Parser {
        bytes: input.as_bytes(),
        pos: 0,
    };
    let value = parser.value(0)?;
    if parser.pos != parser.bytes.len() {
        return Err(parser.error("trailing data"));
    }
    Ok(value)
}

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, what: &str) -> Error {
        Error::Deserialize(format!("serialized data: {} at byte {}", what, self.pos))
    }

    fn peek(&self) -> Result<u8, Error> {
        self.bytes
            .get(self.pos)
            .copied()
            .ok_or_else(|| self.error("unexpected end"))
    }

    fn expect(&mut self, byte: u8) -> Result<(), Error> {
        if self.peek()? != byte {
            return Err(self.error(&format!("expected {:?}", byte as char)));
        }
        self.pos += 1;
        Ok(())
    }

    /// Raw text up to (not including) `terminator`, which is consumed.
    fn until(&mut self, terminator: u8) -> Result<&str, Error> {
        let start = self.pos;
        let len = self.bytes[start..]
            .iter()
            .position(|b| *b == terminator)
            .ok_or_else(|| self.error("unterminated token"))?;
        self.pos = start + len + 1;
        std::str::from_utf8(&self.bytes[start..start + len])
            .map_err(|_| Error::Deserialize("serialized data: invalid utf-8".to_string()))
    }

    fn int(&mut self, terminator: u8) -> Result<i64, Error> {
        let raw = self.until(terminator)?;
        raw.parse::<i64>()
            .map_err(|_| Error::Deserialize(format!("serialized data: bad integer {:?}", raw)))
    }

    fn value(&mut self, depth: usize) -> Result<Value, Error> {
        if depth > MAX_DEPTH {
            return Err(self.error("nesting too deep"));
        }

        let tag = self.peek()?;
        self.pos += 1;
        if tag == b'N' {
            self.expect(b';')?;
            return Ok(Value::Null);
        }
        self.expect(b':')?;

        match tag {
            b'b' => match self.int(b';')? {
                0 => Ok(Value::Bool(false)),
                1 => Ok(Value::Bool(true)),
                _ => Err(self.error("bad boolean")),
            },
            b'i' => Ok(Value::Number(Number::from(self.int(b';')?))),
            b'd' => {
                let raw = self.until(b';')?;
                let parsed = raw.parse::<f64>().map_err(|_| {
                    Error::Deserialize(format!("serialized data: bad float {:?}", raw))
                })?;
                Ok(Number::from_f64(parsed).map_or(Value::Null, Value::Number))
            }
            b's' => self.string().map(Value::String),
            b'a' => self.array(depth),
            _ => Err(Error::Deserialize(format!(
                "serialized data: unsupported type {:?}",
                tag as char
            ))),
        }
    }

    // Called after `s:`.
    fn string(&mut self) -> Result<String, Error> {
        let len = usize::try_from(self.int(b':')?).map_err(|_| self.error("negative length"))?;
        self.expect(b'"')?;
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| self.error("string length past end"))?;
        let text = String::from_utf8_lossy(&self.bytes[self.pos..end]).into_owned();
        self.pos = end;
        self.expect(b'"')?;
        self.expect(b';')?;
        Ok(text)
    }

    // Called after `a:`. Sequential integer keys starting at zero become a
    // JSON array, anything else an object keeping the serialized key order.
    fn array(&mut self, depth: usize) -> Result<Value, Error> {
        let count = usize::try_from(self.int(b':')?).map_err(|_| self.error("negative count"))?;
        self.expect(b'{')?;

        let mut entries: Vec<(String, Value)> = Vec::new();
        let mut sequential = true;
        for position in 0..count {
            let key = match self.peek()? {
                b'i' => {
                    self.pos += 1;
                    self.expect(b':')?;
                    let index = self.int(b';')?;
                    if index != position as i64 {
                        sequential = false;
                    }
                    index.to_string()
                }
                b's' => {
                    self.pos += 1;
                    self.expect(b':')?;
                    sequential = false;
                    self.string()?
                }
                _ => return Err(self.error("bad array key")),
            };
            let value = self.value(depth + 1)?;
            entries.push((key, value));
        }
        self.expect(b'}')?;

        if sequential {
            return Ok(Value::Array(entries.into_iter().map(|(_, v)| v).collect()));
        }
        let mut map = Map::with_capacity(entries.len());
        for (key, value) in entries {
            map.insert(key, value);
        }
        Ok(Value::Object(map))
    }
}
