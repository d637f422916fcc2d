//! Small line-oriented builder for the generated JavaScript.

use serde::Serialize;

/// Accumulates lines of generated code with tab indentation.
///
/// Empty lines are never indented so the output stays free of trailing whitespace.
#[derive(Debug, Default)]
pub struct CodeBuilder {
  lines: Vec<String>,
  depth: usize,
}

impl CodeBuilder {
  /// Create an empty builder at depth zero.
  pub fn new() -> Self {
    Self::default()
  }

  /// Append one or more lines at the current depth. Embedded newlines start new lines.
  pub fn line(&mut self, text: impl AsRef<str>) -> &mut Self {
    for piece in text.as_ref().split('\n') {
      if piece.is_empty() {
        self.lines.push(String::new());
      } else {
        self.lines.push(format!("{}{piece}", "\t".repeat(self.depth)));
      }
    }
    self
  }

  /// Append an empty line.
  pub fn blank(&mut self) -> &mut Self {
    self.lines.push(String::new());
    self
  }

  /// Emit the lines produced by `body` one level deeper.
  pub fn indent(&mut self, body: impl FnOnce(&mut Self)) -> &mut Self {
    self.depth += 1;
    body(self);
    self.depth -= 1;
    self
  }

  /// Emit `open`, the indented `body`, then `close`.
  pub fn block(
    &mut self,
    open: impl AsRef<str>,
    close: impl AsRef<str>,
    body: impl FnOnce(&mut Self),
  ) -> &mut Self {
    self.line(open);
    self.indent(body);
    self.line(close)
  }

  /// Run `body` only when `condition` holds.
  pub fn when(&mut self, condition: bool, body: impl FnOnce(&mut Self)) -> &mut Self {
    if condition {
      body(self);
    }
    self
  }

  /// Append already rendered code at the current depth.
  pub fn append(&mut self, code: &CodeBuilder) -> &mut Self {
    let prefix = "\t".repeat(self.depth);
    self.lines.extend(code.lines.iter().map(|line| {
      if line.is_empty() {
        String::new()
      } else {
        format!("{prefix}{line}")
      }
    }));
    self
  }

  /// Join the lines with `\n`.
  pub fn render(&self) -> String {
    self.lines.join("\n")
  }
}

/// JavaScript string literal for `value`.
pub fn js_string(value: &str) -> String {
  serde_json::Value::String(value.to_string()).to_string()
}

/// JavaScript literal (object, array, number) for any serializable value.
pub fn js_json<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<String> {
  serde_json::to_string(value)
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::BTreeMap;

  #[test]
  fn blocks_indent_with_tabs() {
    let mut code = CodeBuilder::new();
    code
      .line("var a = 1;")
      .block("if (a) {", "}", |code| {
        code.line("a++;").blank().line("b();\nc();");
      })
      .when(false, |code| {
        code.line("never();");
      });

    assert_eq!(code.render(), "var a = 1;\nif (a) {\n\ta++;\n\n\tb();\n\tc();\n}");
  }

  #[test]
  fn append_reindents_nested_code() {
    let mut inner = CodeBuilder::new();
    inner.block("x({", "});", |code| {
      code.line("y: 1");
    });

    let mut outer = CodeBuilder::new();
    outer.indent(|code| {
      code.append(&inner);
    });
    assert_eq!(outer.render(), "\tx({\n\t\ty: 1\n\t});");
  }

  #[test]
  fn literals_are_escaped() {
    assert_eq!(js_string("a\"b"), r#""a\"b""#);
    let map = BTreeMap::from([("1", 1), ("2", 1)]);
    assert_eq!(js_json(&map).unwrap(), r#"{"1":1,"2":1}"#);
  }
}
