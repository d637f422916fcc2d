//! Generate the stylesheet loader spliced into a runtime chunk.
//!
//! Two fragments are produced: the declaration of the installed-chunk table and the body
//! of the chunk-ensure handler. The handler deduplicates against tags already in the
//! page, shares one promise per chunk between concurrent requests and forgets a chunk
//! when its stylesheet fails, so a later request retries. Skinned chunks load one
//! stylesheet per skin; every skin other than the base and the active one is inserted
//! as a disabled alternate stylesheet whose failure is only logged.

use std::sync::LazyLock;

use regex::Regex;

use crate::PLUGIN_NAME;
use crate::manifest::skins::SkinTable;
use crate::runtime::codegen::{CodeBuilder, js_json, js_string};

static CSS_NAME: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"\+(?:chunkId|\(\{.+\}\[chunkId\]\|\|chunkId\))\+").expect("invalid name slot regex")
});

/// Inputs of the chunk-ensure handler.
#[derive(Debug, Clone)]
pub struct LoaderSpec<'a> {
  /// Ids of the async chunks that have a stylesheet.
  pub css_chunks: Vec<&'a str>,
  /// JavaScript expression of a chunk's relative href, in terms of `chunkId`.
  pub link_href_path: String,
  /// JavaScript expression of the public path.
  pub public_path: String,
  /// `crossOrigin` value for cross-origin stylesheets.
  pub cross_origin: Option<&'a str>,
  /// Skin table of the runtime chunk.
  pub skins: Option<&'a SkinTable>,
  /// Global property holding the active skin.
  pub skin_field: &'a str,
  /// Skin assumed when the global property is unset.
  pub default_skin: &'a str,
}

/// Declaration of the installed-chunk table, seeded with the runtime chunk's own ids.
pub fn local_vars(installed: &[&str]) -> String {
  let mut code = CodeBuilder::new();
  code
    .line("// object to store loaded CSS chunks")
    .block("var installedCssChunks = {", "}", |code| {
      let entries: Vec<String> = installed
        .iter()
        .map(|id| format!("{}: 0", js_string(id)))
        .collect();
      code.line(entries.join(",\n"));
    });
  code.render()
}

/// Body of the chunk-ensure handler.
pub fn require_ensure(spec: &LoaderSpec<'_>) -> serde_json::Result<String> {
  let css_chunks: std::collections::BTreeMap<&str, u8> =
    spec.css_chunks.iter().map(|id| (*id, 1)).collect();

  let mut code = CodeBuilder::new();
  code
    .line(format!("// {PLUGIN_NAME} CSS loading"))
    .line(format!("var cssChunks = {};", js_json(&css_chunks)?))
    .line("if(installedCssChunks[chunkId]) { promises.push(installedCssChunks[chunkId]); }");

  let body = match (spec.skins, name_slot(&spec.link_href_path)) {
    (Some(skins), Some(slot)) => skin_loader(spec, skins, slot)?,
    (Some(_), None) => {
      tracing::debug!(
        href = %spec.link_href_path,
        "chunk filename has no name slot, skins load as plain stylesheets"
      );
      plain_loader(spec)
    }
    (None, _) => plain_loader(spec),
  };
  code.block(
    "else if(installedCssChunks[chunkId] !== 0 && cssChunks[chunkId]) {",
    "}",
    |code| {
      code.append(&body);
    },
  );
  Ok(code.render())
}

/// Byte offset of the `+name+` slot the skin prefix is inserted in front of.
fn name_slot(link_href_path: &str) -> Option<usize> {
  CSS_NAME.find(link_href_path).map(|slot| slot.start())
}

/// Scan existing link and style tags and prepare a fresh link tag.
fn find_or_create_tag(spec: &LoaderSpec<'_>) -> CodeBuilder {
  let mut code = CodeBuilder::new();
  code
    .line(format!(
      "var fullhref = {} + href, DOC = document, tag;",
      spec.public_path
    ))
    .line("for (")
    .indent(|code| {
      code
        .block("var existingTags = [", "], i = 0, list, j;", |code| {
          code
            .line("DOC.querySelectorAll('link[rel=\"' + REL + '\"]'),")
            .line("DOC.querySelectorAll(\"style\")");
        })
        .line("i < 2;")
        .line("i++");
    })
    .block(") {", "}", |code| {
      code.block("for ( list = existingTags[i], j = 0; j < list.length; j++ ) {", "}", |code| {
        code
          .line("tag = (tag = list[j]).getAttribute(\"data-href\") || tag.getAttribute(\"href\");")
          .line("if(tag === href || tag === fullhref) { return resolve(); }");
      });
    })
    .line("tag = DOC.createElement(\"link\");")
    .line("tag.type = \"text/css\";");
  code
}

fn append_tag(spec: &LoaderSpec<'_>) -> CodeBuilder {
  let mut code = CodeBuilder::new();
  code
    .line("tag.href = fullhref;")
    .when(spec.cross_origin.is_some(), |code| {
      let value = js_string(spec.cross_origin.unwrap_or_default());
      code.line(format!(
        "if (tag.href.indexOf(location.origin + '/') !== 0) {{ tag.crossOrigin = {value}; }}"
      ));
    })
    .line("DOC.head.appendChild(tag);");
  code
}

fn reject_failure(code: &mut CodeBuilder) {
  code
    .line("var err = new Error(\"Loading CSS chunk \" + chunkId + \" failed.\\n(\" + fullhref + \")\");")
    .line("err.code = \"CSS_CHUNK_LOAD_FAILED\";")
    .line("err.request = fullhref;")
    .line("reject(err);");
}

fn plain_loader(spec: &LoaderSpec<'_>) -> CodeBuilder {
  let mut code = CodeBuilder::new();
  code.block(
    "promises.push(installedCssChunks[chunkId] = new Promise(function(resolve, reject) {",
    "}).then(function() { installedCssChunks[chunkId] = 0; }));",
    |code| {
      code
        .line("var REL = \"stylesheet\";")
        .line(format!("var href = {};", spec.link_href_path))
        .append(&find_or_create_tag(spec))
        .line("tag.rel = REL;")
        .line("tag.onload = resolve;")
        .block("tag.onerror = function() {", "};", |code| {
          code
            .line("tag.parentNode.removeChild(tag);")
            .line("delete installedCssChunks[chunkId];");
          reject_failure(code);
        })
        .append(&append_tag(spec));
    },
  );
  code
}

fn skin_loader(spec: &LoaderSpec<'_>, skins: &SkinTable, slot: usize) -> serde_json::Result<CodeBuilder> {
  let alternate = match &skins.map {
    Some(map) => format!("{}[chunkId]", js_json(map)?),
    None => "0".to_string(),
  };
  let diff = match &skins.info {
    Some(info) => format!("{}[alternate]", js_json(info)?),
    None => "0".to_string(),
  };
  let (path, hash) = (&spec.link_href_path[..slot], &spec.link_href_path[slot + 1..]);
  let active = format!(
    "(window.{} || {})",
    spec.skin_field,
    js_string(spec.default_skin)
  );

  let mut code = CodeBuilder::new();
  code
    .line(format!("var skins = {};", js_json(&skins.skins)?))
    .line(format!("var alternate = {alternate};"))
    .line("var len, skin, path, hash, sheet;")
    .block(format!("if (alternate && (alternate = {diff})) {{"), "}", |code| {
      code
        .line("var lLen = alternate.l && alternate.l.length;")
        .block("if (lLen) {", "} else { sheet = skins; }", |code| {
          code
            .line("sheet = [], len = skins.length, path = 0;")
            .block("while (path < len) {", "}", |code| {
              code
                .line("skin = skins[path++];")
                .line("for (hash = 0; hash < lLen; hash++) { if (skin === alternate.l[hash]) { skin = null; break; } }")
                .line("skin !== null && sheet.push(skin);");
            });
        })
        .line("alternate.e && (sheet = sheet.concat(alternate.e));")
        .line("skins = sheet;");
    })
    .block("if ((len = skins.length)) {", "}", |code| {
      code
        .line(format!("path = {};", path.trim_end()))
        .line(format!("hash = {};", hash.trim_start()))
        .line("sheet = \"stylesheet\";")
        .line("alternate = \"alternate \";")
        .block("skin = function(title) {", "};", |code| {
          code.block("return new Promise(function(resolve, reject) {", "});", |code| {
            code
              .line(format!("var isAlternate = title && title != {active};"))
              .line("var href = path + (title ? title + '@' : '') + hash;")
              .line("var REL = isAlternate ? alternate + sheet : sheet;")
              .append(&find_or_create_tag(spec))
              .line("title && (tag.title = title);")
              .block(
                "isAlternate ? resolve((tag.disabled = true)) : (tag.onload = title ? function (event) {",
                "} : resolve);",
                |code| {
                  code
                    .line("tag.onload = null;")
                    .line("tag.disabled = true;")
                    .line("tag.disabled = false;")
                    .line("resolve(event);");
                },
              )
              .block("tag.onerror = function() {", "};", |code| {
                code
                  .line("tag.parentNode.removeChild(tag);")
                  .line("if (isAlternate) { return console.warn(\"Loading alternate skin \" + title + \" of CSS chunk \" + chunkId + \" failed.\\n(\" + fullhref + \")\"); }")
                  .line("delete installedCssChunks[chunkId];");
                reject_failure(code);
              })
              .line("tag.rel = REL;")
              .append(&append_tag(spec));
          });
        })
        .line("while(len--) { skins[len] = skin(skins[len]); }")
        .line("promises.push(installedCssChunks[chunkId] = Promise.all(skins).then(function() { installedCssChunks[chunkId] = 0; }));");
    });
  Ok(code)
}
