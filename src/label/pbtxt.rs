// 该文件是 Kanjian （看见） 项目的一部分。
// src/label/pbtxt.rs - 目标检测标签映射（protobuf 文本格式）解析
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

//! 只解析 `item { ... }` 块中的 `id`、`name` 与 `display_name`，
//! 其余字段与嵌套块会被跳过。
//!
//! ```text
//! item {
//!   name: "/m/01g317"
//!   id: 1
//!   display_name: "person"
//! }
//! ```

#[derive(Debug, Clone, PartialEq)]
pub struct LabelItem {
  /// `item` 所在行
  pub line: usize,
  pub id: i64,
  pub name: Option<String>,
  pub display_name: Option<String>,
}

impl LabelItem {
  /// 优先使用 `display_name`
  pub fn label(&self) -> Option<&str> {
    self.display_name.as_deref().or(self.name.as_deref())
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxError {
  pub line: usize,
  pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
  Ident(String),
  Str(String),
  Number(String),
  Colon,
  Open,
  Close,
}

struct Lexer<'a> {
  chars: std::iter::Peekable<std::str::Chars<'a>>,
  line: usize,
}

impl<'a> Lexer<'a> {
  fn new(text: &'a str) -> Self {
    Self {
      chars: text.chars().peekable(),
      line: 1,
    }
  }

  fn error(&self, message: impl Into<String>) -> SyntaxError {
    SyntaxError {
      line: self.line,
      message: message.into(),
    }
  }

  fn skip_blank(&mut self) {
    while let Some(&c) = self.chars.peek() {
      match c {
        '\n' => {
          self.line += 1;
          self.chars.next();
        }
        '#' => {
          while let Some(&c) = self.chars.peek() {
            if c == '\n' {
              break;
            }
            self.chars.next();
          }
        }
        c if c.is_whitespace() || c == ',' || c == ';' => {
          self.chars.next();
        }
        _ => break,
      }
    }
  }

  fn quoted(&mut self, quote: char) -> Result<String, SyntaxError> {
    let mut value = String::new();
    loop {
      match self.chars.next() {
        None | Some('\n') => return Err(self.error("字符串未闭合")),
        Some('\\') => match self.chars.next() {
          Some('n') => value.push('\n'),
          Some('t') => value.push('\t'),
          Some(c) => value.push(c),
          None => return Err(self.error("字符串未闭合")),
        },
        Some(c) if c == quote => return Ok(value),
        Some(c) => value.push(c),
      }
    }
  }

  fn next_token(&mut self) -> Result<Option<(usize, Token)>, SyntaxError> {
    self.skip_blank();
    let line = self.line;
    let Some(c) = self.chars.next() else {
      return Ok(None);
    };

    let token = match c {
      ':' => Token::Colon,
      '{' | '<' => Token::Open,
      '}' | '>' => Token::Close,
      '"' | '\'' => Token::Str(self.quoted(c)?),
      c if c.is_ascii_digit() || c == '-' || c == '+' => {
        let mut value = c.to_string();
        while let Some(&c) = self.chars.peek() {
          if c.is_ascii_alphanumeric() || c == '.' {
            value.push(c);
            self.chars.next();
          } else {
            break;
          }
        }
        Token::Number(value)
      }
      c if c.is_alphabetic() || c == '_' => {
        let mut value = c.to_string();
        while let Some(&c) = self.chars.peek() {
          if c.is_alphanumeric() || c == '_' || c == '.' {
            value.push(c);
            self.chars.next();
          } else {
            break;
          }
        }
        Token::Ident(value)
      }
      other => return Err(self.error(format!("意外的字符 '{}'", other))),
    };

    Ok(Some((line, token)))
  }
}

struct Parser<'a> {
  lexer: Lexer<'a>,
  peeked: Option<(usize, Token)>,
}

impl<'a> Parser<'a> {
  fn peek(&mut self) -> Result<Option<&Token>, SyntaxError> {
    if self.peeked.is_none() {
      self.peeked = self.lexer.next_token()?;
    }
    Ok(self.peeked.as_ref().map(|(_, token)| token))
  }

  fn next(&mut self) -> Result<Option<(usize, Token)>, SyntaxError> {
    match self.peeked.take() {
      Some(token) => Ok(Some(token)),
      None => self.lexer.next_token(),
    }
  }

  fn expect_next(&mut self) -> Result<(usize, Token), SyntaxError> {
    self
      .next()?
      .ok_or_else(|| self.lexer.error("文件意外结束"))
  }

  /// 读取字段名之后的部分：`: value`、`{ ... }` 或 `: { ... }`
  fn field_value(&mut self) -> Result<FieldValue, SyntaxError> {
    if self.peek()? == Some(&Token::Colon) {
      self.next()?;
    }
    let (line, token) = self.expect_next()?;
    match token {
      Token::Open => Ok(FieldValue::Block),
      Token::Str(value) => {
        // 相邻字符串自动拼接
        let mut value = value;
        while matches!(self.peek()?, Some(Token::Str(_))) {
          if let Some((_, Token::Str(more))) = self.next()? {
            value.push_str(&more);
          }
        }
        Ok(FieldValue::Scalar(line, value))
      }
      Token::Number(value) | Token::Ident(value) => Ok(FieldValue::Scalar(line, value)),
      Token::Colon | Token::Close => Err(SyntaxError {
        line,
        message: "缺少字段值".to_string(),
      }),
    }
  }

  fn skip_block(&mut self) -> Result<(), SyntaxError> {
    let mut depth = 1usize;
    while depth > 0 {
      match self.expect_next()?.1 {
        Token::Open => depth += 1,
        Token::Close => depth -= 1,
        _ => {}
      }
    }
    Ok(())
  }

  fn item(&mut self, start: usize) -> Result<LabelItem, SyntaxError> {
    let mut id = None;
    let mut name = None;
    let mut display_name = None;

    loop {
      let (line, token) = self.expect_next()?;
      let field = match token {
        Token::Close => break,
        Token::Ident(field) => field,
        other => {
          return Err(SyntaxError {
            line,
            message: format!("期望字段名，实际为 {:?}", other),
          });
        }
      };

      match (field.as_str(), self.field_value()?) {
        (_, FieldValue::Block) => self.skip_block()?,
        ("id", FieldValue::Scalar(line, value)) => {
          let parsed = value.parse::<i64>().map_err(|_| SyntaxError {
            line,
            message: format!("id 不是整数: {}", value),
          })?;
          id = Some(parsed);
        }
        ("name", FieldValue::Scalar(_, value)) => name = Some(value),
        ("display_name", FieldValue::Scalar(_, value)) => display_name = Some(value),
        _ => {}
      }
    }

    let id = id.ok_or(SyntaxError {
      line: start,
      message: "item 缺少 id 字段".to_string(),
    })?;

    Ok(LabelItem {
      line: start,
      id,
      name,
      display_name,
    })
  }
}

enum FieldValue {
  Scalar(usize, String),
  Block,
}

/// 解析标签映射文本，返回所有 `item`，顺序与文件一致
pub fn parse(text: &str) -> Result<Vec<LabelItem>, SyntaxError> {
  let mut parser = Parser {
    lexer: Lexer::new(text),
    peeked: None,
  };
  let mut items = Vec::new();

  while let Some((line, token)) = parser.next()? {
    let field = match token {
      Token::Ident(field) => field,
      other => {
        return Err(SyntaxError {
          line,
          message: format!("期望顶层字段，实际为 {:?}", other),
        });
      }
    };

    match parser.field_value()? {
      FieldValue::Block if field == "item" => items.push(parser.item(line)?),
      FieldValue::Block => parser.skip_block()?,
      FieldValue::Scalar(..) => {}
    }
  }

  Ok(items)
}
