use crate::layout::{Layout, Node};
use crate::models::UpdateResponse;
use html_escape::{encode_double_quoted_attribute as attr, encode_text as text};

/// Renders the page for `layout`. `initial` holds the outputs of the first
/// dispatch; text outputs are inlined, figures are drawn by the page script.
pub fn render_page(layout: &Layout, base_path: &str, initial: &UpdateResponse) -> String {
    let mut body = String::new();
    render_nodes(&layout.nodes, initial, &mut body);

    let title = text(&layout.title);
    let base = script_json(&serde_json::Value::from(base_path));
    let initial = script_json(initial);
    fill(
        INDEX_HTML,
        &[
            ("{{TITLE}}", &*title),
            ("{{BODY}}", body.as_str()),
            ("{{BASE}}", base.as_str()),
            ("{{INITIAL}}", initial.as_str()),
        ],
    )
}

/// Substitutes placeholders in one pass over `template`. Inserted values are
/// never scanned again, so text that looks like a placeholder stays literal.
fn fill(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(at) = rest.find("{{") {
        out.push_str(&rest[..at]);
        rest = &rest[at..];
        match values.iter().find(|(key, _)| rest.starts_with(key)) {
            Some((key, value)) => {
                out.push_str(value);
                rest = &rest[key.len()..];
            }
            None => {
                out.push_str("{{");
                rest = &rest[2..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// JSON safe to place inside a `<script>` element. `<` only occurs inside
/// JSON strings, where `\u003c` decodes to the same character.
fn script_json(value: &impl serde::Serialize) -> String {
    serde_json::to_string(value)
        .unwrap_or_else(|_| "null".to_string())
        .replace('<', "\\u003c")
}

fn render_nodes(nodes: &[Node], initial: &UpdateResponse, out: &mut String) {
    for node in nodes {
        render_node(node, initial, out);
    }
}

fn render_node(node: &Node, initial: &UpdateResponse, out: &mut String) {
    match node {
        Node::Banner { title, image } => {
            let style = image
                .as_ref()
                .map(|url| format!(" style=\"background-image: url('{}')\"", attr(url)))
                .unwrap_or_default();
            out.push_str(&format!(
                "<header class=\"banner\"{style}><h1>{}</h1></header>\n",
                text(title)
            ));
        }
        Node::Heading(title) => out.push_str(&format!("<h5>{}</h5>\n", text(title))),
        Node::Dropdown {
            id,
            options,
            clearable,
        } => {
            out.push_str(&format!(
                "<select class=\"control\" id=\"{id}\" data-slot=\"{id}\">\n",
                id = attr(id)
            ));
            if *clearable || options.options.is_empty() {
                out.push_str("  <option value=\"\">Select...</option>\n");
            }
            for option in &options.options {
                let selected = if options.default.as_deref() == Some(option.value.as_str()) {
                    " selected"
                } else {
                    ""
                };
                out.push_str(&format!(
                    "  <option value=\"{}\"{selected}>{}</option>\n",
                    attr(&option.value),
                    text(&option.label)
                ));
            }
            out.push_str("</select>\n");
        }
        Node::DatePicker {
            id,
            placeholder,
            default,
        } => out.push_str(&input_html("date", id, default.as_deref(), Some(*placeholder))),
        Node::DateRange {
            start_id,
            end_id,
            start,
            end,
        } => {
            out.push_str("<div class=\"range\">\n");
            out.push_str(&input_html("date", start_id, start.as_deref(), Some("Start date")));
            out.push_str("<span class=\"range-sep\">to</span>\n");
            out.push_str(&input_html("date", end_id, end.as_deref(), Some("End date")));
            out.push_str("</div>\n");
        }
        Node::TimeInput { id, default } => {
            out.push_str(&input_html("time", id, default.as_deref(), None))
        }
        Node::Divider => out.push_str("<hr />\n"),
        Node::Text { id } => {
            let content = initial
                .outputs
                .get(*id)
                .and_then(|value| value.as_str())
                .unwrap_or_default();
            out.push_str(&format!(
                "<div class=\"output text\" id=\"{}\" data-output>{}</div>\n",
                attr(id),
                text(content)
            ));
        }
        Node::Graph { id } => out.push_str(&format!(
            "<div class=\"output graph\" id=\"{}\" data-output><svg viewBox=\"0 0 720 300\" role=\"img\"></svg><div class=\"legend\"></div></div>\n",
            attr(id)
        )),
        Node::Status => out.push_str("<div class=\"status-widget\" id=\"status-widget\"></div>\n"),
        Node::Section { title, children } => {
            out.push_str("<section class=\"card\">\n");
            if let Some(title) = title {
                out.push_str(&format!("<h2>{}</h2>\n", text(title)));
            }
            render_nodes(children, initial, out);
            out.push_str("</section>\n");
        }
    }
}

fn input_html(kind: &str, id: &str, value: Option<&str>, placeholder: Option<&str>) -> String {
    let value = value.map(|v| format!(" value=\"{}\"", attr(v))).unwrap_or_default();
    let placeholder = placeholder
        .map(|p| format!(" placeholder=\"{}\"", attr(p)))
        .unwrap_or_default();
    format!(
        "<input class=\"control\" type=\"{kind}\" id=\"{id}\" data-slot=\"{id}\"{value}{placeholder} />\n",
        id = attr(id)
    )
}

const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1.0" />
  <title>{{TITLE}}</title>
  <style>
    :root {
      --ink: #2b2a28;
      --muted: #6b645d;
      --accent: #ff6b4a;
      --accent-2: #2f4858;
      --card: #ffffff;
      --line: rgba(47, 72, 88, 0.12);
    }

    * {
      box-sizing: border-box;
    }

    body {
      margin: 0;
      background: #f6f4ef;
      color: var(--ink);
      font-family: sans-serif;
    }

    main {
      width: 95%;
      max-width: 900px;
      min-width: 320px;
      margin: 40px auto;
      display: grid;
      gap: 16px;
    }

    .banner {
      background-size: cover;
      background-position: center;
      background-color: var(--accent-2);
      padding: 40px 0;
      border-radius: 12px;
      box-shadow: 0 2px 8px rgba(0, 0, 0, 0.15);
    }

    .banner h1 {
      text-align: center;
      color: white;
      text-shadow: 2px 2px 8px #333;
      margin: 0;
    }

    h5 {
      margin: 8px 0 0;
      font-size: 1rem;
      letter-spacing: 0.08em;
    }

    .card {
      background: var(--card);
      border-radius: 16px;
      padding: 16px;
      border: 1px solid var(--line);
      display: grid;
      gap: 12px;
    }

    .card h2 {
      margin: 0;
      font-size: 1.2rem;
    }

    .control {
      font: inherit;
      padding: 8px 10px;
      border-radius: 8px;
      border: 1px solid rgba(47, 72, 88, 0.25);
      background: white;
      margin-right: 12px;
    }

    select.control {
      width: 100%;
    }

    .range {
      display: flex;
      align-items: center;
      gap: 8px;
      flex-wrap: wrap;
    }

    .output.text {
      font-size: 18px;
      min-height: 1.4em;
    }

    .output.graph svg {
      width: 100%;
      height: 300px;
      display: block;
    }

    .output[data-state="error"] {
      outline: 2px solid #c63b2b;
      outline-offset: 4px;
      border-radius: 4px;
    }

    .output-error {
      color: #c63b2b;
      font-size: 0.9rem;
    }

    .axis-label,
    .tick {
      fill: #7a746d;
      font-size: 11px;
    }

    .grid {
      stroke: var(--line);
    }

    .series {
      fill: none;
      stroke-width: 2;
    }

    .legend {
      display: flex;
      gap: 12px;
      font-size: 0.85rem;
      color: var(--muted);
    }

    .status-widget {
      display: flex;
      gap: 10px;
      flex-wrap: wrap;
      font-size: 0.9rem;
    }

    .status-pill {
      padding: 4px 10px;
      border-radius: 999px;
      background: rgba(47, 72, 88, 0.08);
    }

    .status-pill[data-state="fresh"] {
      color: #2d7a4b;
    }

    .status-pill[data-state="stale"],
    .status-pill[data-state="unavailable"] {
      color: #c63b2b;
    }

    .status {
      color: var(--muted);
      min-height: 1.2em;
    }

    .status[data-type="error"] {
      color: #c63b2b;
    }

    .status[data-type="prompt"] {
      color: var(--accent-2);
      font-weight: 600;
    }
  </style>
</head>
<body>
  <main>
{{BODY}}
    <div class="status" id="status"></div>
  </main>

  <script id="dash-base" type="application/json">{{BASE}}</script>
  <script id="dash-initial" type="application/json">{{INITIAL}}</script>
  <script>
    const BASE = JSON.parse(document.getElementById('dash-base').textContent);
    const initial = JSON.parse(document.getElementById('dash-initial').textContent);
    const statusEl = document.getElementById('status');
    const controls = Array.from(document.querySelectorAll('[data-slot]'));
    const COLORS = ['#ff6b4a', '#2f4858', '#33a1a1', '#b5838d', '#6d597a'];

    const setStatus = (message, type) => {
      statusEl.textContent = message;
      statusEl.dataset.type = type || '';
    };

    const currentValues = () => {
      const values = {};
      controls.forEach((el) => {
        values[el.dataset.slot] = el.value === '' ? null : el.value;
      });
      return values;
    };

    const toNumber = (value, isTime) => {
      if (value === null || value === undefined) {
        return null;
      }
      if (isTime) {
        const ms = Date.parse(String(value).endsWith('Z') ? value : value + 'Z');
        return Number.isNaN(ms) ? null : ms;
      }
      return typeof value === 'number' ? value : null;
    };

    const formatTick = (value, isTime) => {
      if (isTime) {
        const d = new Date(value);
        return `${d.getUTCMonth() + 1}/${d.getUTCDate()} ${String(d.getUTCHours()).padStart(2, '0')}h`;
      }
      const rounded = Math.round(value * 10) / 10;
      return Number.isInteger(rounded) ? rounded.toString() : rounded.toFixed(1);
    };

    const extent = (values, fallback) => {
      const finite = values.filter((v) => v !== null);
      if (!finite.length) {
        return fallback;
      }
      let min = Math.min(...finite);
      let max = Math.max(...finite);
      if (min === max) {
        min -= 1;
        max += 1;
      }
      return [min, max];
    };

    const renderFigure = (container, figure) => {
      const svg = container.querySelector('svg');
      const legend = container.querySelector('.legend');
      const width = 720;
      const height = 300;
      const left = 56;
      const right = 16;
      const top = 28;
      const bottom = 44;

      const xTime = figure.x_axis.kind === 'time';
      const yTime = figure.y_axis.kind === 'time';
      const traces = figure.traces.map((trace) => ({
        name: trace.name,
        xs: trace.x.map((v) => toNumber(v, xTime)),
        ys: trace.y.map((v) => toNumber(v, yTime)),
      }));
      const points = traces.reduce((n, t) => n + t.xs.length, 0);

      let header = `<text class="axis-label" x="${left}" y="16">${figure.title}</text>`;
      if (!points) {
        svg.innerHTML = header + `<text class="axis-label" x="50%" y="50%" text-anchor="middle">No data for this selection</text>`;
        legend.innerHTML = '';
        return;
      }

      const xRange = figure.x_axis.range
        ? figure.x_axis.range.map((v) => toNumber(v, xTime))
        : extent(traces.flatMap((t) => t.xs), [0, 1]);
      const yRange = extent(traces.flatMap((t) => t.ys), [0, 1]);
      const sx = (v) => left + ((v - xRange[0]) / (xRange[1] - xRange[0] || 1)) * (width - left - right);
      const sy = (v) => height - bottom - ((v - yRange[0]) / (yRange[1] - yRange[0] || 1)) * (height - top - bottom);

      let grid = '';
      for (let i = 0; i <= 4; i += 1) {
        const yv = yRange[0] + ((yRange[1] - yRange[0]) * i) / 4;
        grid += `<line class="grid" x1="${left}" y1="${sy(yv)}" x2="${width - right}" y2="${sy(yv)}" />`;
        grid += `<text class="tick" x="${left - 6}" y="${sy(yv) + 4}" text-anchor="end">${formatTick(yv, yTime)}</text>`;
        const xv = xRange[0] + ((xRange[1] - xRange[0]) * i) / 4;
        grid += `<text class="tick" x="${sx(xv)}" y="${height - bottom + 16}" text-anchor="middle">${formatTick(xv, xTime)}</text>`;
      }
      const labels = `<text class="axis-label" x="${width / 2}" y="${height - 6}" text-anchor="middle">${figure.x_axis.title}</text>`
        + `<text class="axis-label" x="12" y="${height / 2}" transform="rotate(-90 12 ${height / 2})" text-anchor="middle">${figure.y_axis.title}</text>`;

      const paths = traces.map((trace, idx) => {
        let d = '';
        let pen = 'M';
        trace.xs.forEach((x, i) => {
          const y = trace.ys[i];
          if (x === null || y === null) {
            pen = 'M';
            return;
          }
          d += `${pen} ${sx(x).toFixed(1)} ${sy(y).toFixed(1)} `;
          pen = 'L';
        });
        return `<path class="series" stroke="${COLORS[idx % COLORS.length]}" d="${d}" />`;
      }).join('');

      svg.innerHTML = header + grid + labels + paths;
      legend.innerHTML = traces
        .map((t, idx) => `<span style="color: ${COLORS[idx % COLORS.length]}">&#9632; ${t.name}</span>`)
        .join('');
    };

    const renderOutput = (slot, value) => {
      const el = document.getElementById(slot);
      if (!el) {
        return;
      }
      el.dataset.state = '';
      const stale = el.querySelector('.output-error');
      if (stale) {
        stale.remove();
      }
      if (el.classList.contains('graph')) {
        if (value) {
          renderFigure(el, value);
        }
      } else {
        el.textContent = value === null ? '' : String(value);
      }
    };

    const renderError = (slot, message) => {
      const el = document.getElementById(slot);
      if (!el) {
        return;
      }
      el.dataset.state = 'error';
      let note = el.querySelector('.output-error');
      if (!note) {
        note = document.createElement('div');
        note.className = 'output-error';
        el.appendChild(note);
      }
      note.textContent = message;
    };

    // Declined bindings keep their outputs; their prompts go to the status line.
    const applyResponse = (response) => {
      Object.entries(response.outputs || {}).forEach(([slot, value]) => renderOutput(slot, value));
      Object.entries(response.errors || {}).forEach(([slot, message]) => renderError(slot, message));
      const prompts = response.prompts || [];
      setStatus(prompts.join(' '), prompts.length ? 'prompt' : '');
    };

    let lastSent = currentValues();
    let inFlight = false;

    // One event at a time: its outputs are applied before the next is sent.
    const flush = async () => {
      if (inFlight) {
        return;
      }
      const values = currentValues();
      const changed = Object.keys(values).filter((slot) => values[slot] !== lastSent[slot]);
      if (!changed.length) {
        return;
      }
      inFlight = true;
      lastSent = values;
      try {
        const res = await fetch(`${BASE}_update`, {
          method: 'POST',
          headers: { 'content-type': 'application/json' },
          body: JSON.stringify({ inputs: values, changed })
        });
        if (!res.ok) {
          throw new Error((await res.text()) || 'Update failed');
        }
        applyResponse(await res.json());
      } catch (err) {
        setStatus(err.message, 'error');
      } finally {
        inFlight = false;
      }
      flush();
    };

    controls.forEach((el) => el.addEventListener('change', () => flush()));

    const statusWidget = document.getElementById('status-widget');
    const loadStatus = async () => {
      const res = await fetch(`${BASE}_status`);
      if (!res.ok) {
        throw new Error('Unable to load data status');
      }
      const entries = await res.json();
      statusWidget.innerHTML = entries
        .map((e) => `<span class="status-pill" data-state="${e.state}">${e.label}: ${e.state}${e.latest ? ` (latest ${e.latest})` : ''}</span>`)
        .join('');
    };
    if (statusWidget) {
      loadStatus().catch((err) => setStatus(err.message, 'error'));
      setInterval(() => loadStatus().catch((err) => setStatus(err.message, 'error')), 60000);
    }

    applyResponse(initial);
  </script>
</body>
</html>
"##;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SelectOption, SelectOptions};

    #[test]
    fn renders_controls_with_defaults_and_escapes_text() {
        let layout = Layout {
            title: "Sites & <Things>".into(),
            nodes: vec![
                Node::Dropdown {
                    id: "site",
                    options: SelectOptions {
                        options: vec![
                            SelectOption {
                                label: "North".into(),
                                value: "north".into(),
                            },
                            SelectOption {
                                label: "<South>".into(),
                                value: "south".into(),
                            },
                        ],
                        default: Some("south".into()),
                    },
                    clearable: false,
                },
                Node::TimeInput {
                    id: "time",
                    default: Some("12:00".into()),
                },
                Node::Text { id: "summary" },
            ],
        };
        let mut initial = UpdateResponse::default();
        initial
            .outputs
            .insert("summary".into(), serde_json::json!("Site: </script>"));

        let page = render_page(&layout, "/app/x/", &initial);
        assert!(page.contains("<title>Sites &amp; &lt;Things&gt;</title>"));
        assert!(page.contains("<option value=\"south\" selected>&lt;South&gt;</option>"));
        assert!(page.contains("type=\"time\" id=\"time\" data-slot=\"time\" value=\"12:00\""));
        assert!(page.contains("data-output>Site: &lt;/script&gt;</div>"));
        assert!(page.contains("\"Site: \\u003c/script>\""));
        assert!(page.contains("\"/app/x/\""));
    }

    #[test]
    fn placeholder_text_in_data_stays_literal() {
        let layout = Layout {
            title: "{{BODY}}".into(),
            nodes: vec![
                Node::Dropdown {
                    id: "site",
                    options: SelectOptions {
                        options: vec![SelectOption {
                            label: "{{INITIAL}}".into(),
                            value: "x".into(),
                        }],
                        default: Some("x".into()),
                    },
                    clearable: false,
                },
                Node::Text { id: "summary" },
            ],
        };
        let mut initial = UpdateResponse::default();
        initial
            .outputs
            .insert("summary".into(), serde_json::json!("<img src=x onerror=alert(1)>"));

        let page = render_page(&layout, "/app/x/", &initial);
        assert!(page.contains("<title>{{BODY}}</title>"));
        assert!(page.contains("<option value=\"x\" selected>{{INITIAL}}</option>"));
        assert!(!page.contains("<img"));
        assert!(page.contains("\\u003cimg src=x onerror=alert(1)>"));
    }
}
