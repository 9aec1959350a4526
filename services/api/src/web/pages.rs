//! services/api/src/web/pages.rs
//!
//! Server-rendered HTML for the three browser routes. Pages only display;
//! every state change goes through the REST endpoints or the dialogue channel.

use axum::{
    extract::{Path, State},
    response::Html,
};
use socratic_core::{catalog, Notice, RecordingSink, Route, Topic};
use std::sync::Arc;
use uuid::Uuid;

use crate::web::{middleware::MaybeUser, state::AppState};

const STYLE: &str = r#"
body { margin: 0; font-family: Georgia, serif; background: #faf8f4; color: #222; }
a { color: inherit; }
header.bar { display: flex; justify-content: space-between; align-items: center; padding: 1rem 2rem; border-bottom: 1px solid #e4dfd6; }
main { max-width: 60rem; margin: 0 auto; padding: 2rem; }
.hero { text-align: center; padding: 4rem 1rem; }
.hero h1 { font-size: 2.6rem; margin-bottom: 1rem; }
.button { display: inline-block; padding: .6rem 1.2rem; border: 1px solid #222; border-radius: .4rem; background: #222; color: #fff; text-decoration: none; cursor: pointer; font: inherit; }
.button.ghost { background: transparent; color: #222; }
.steps { display: grid; grid-template-columns: repeat(3, 1fr); gap: 1.5rem; }
.card { background: #fff; border: 1px solid #e4dfd6; border-radius: .6rem; padding: 1.4rem; }
.grid { display: grid; grid-template-columns: repeat(auto-fill, minmax(18rem, 1fr)); gap: 1.5rem; }
.question { font-style: italic; }
.auth { display: flex; gap: .5rem; justify-content: center; flex-wrap: wrap; margin-top: 2rem; }
.auth input { padding: .5rem; border: 1px solid #ccc; border-radius: .4rem; font: inherit; }
#toasts { position: fixed; right: 1rem; bottom: 1rem; display: flex; flex-direction: column; gap: .5rem; }
.toast { background: #fff; border: 1px solid #e4dfd6; border-radius: .4rem; padding: .8rem 1rem; max-width: 22rem; }
.toast.destructive { border-color: #b3261e; color: #b3261e; }
#messages { display: flex; flex-direction: column; gap: .8rem; min-height: 50vh; }
.bubble { max-width: 70%; padding: .8rem 1rem; border-radius: .8rem; white-space: pre-wrap; }
.bubble.user { align-self: flex-end; background: #222; color: #fff; }
.bubble.assistant { align-self: flex-start; background: #fff; border: 1px solid #e4dfd6; }
#thinking { display: none; font-style: italic; color: #777; }
form.compose { display: flex; gap: .5rem; margin-top: 1.5rem; }
form.compose textarea { flex: 1; min-height: 3rem; padding: .6rem; font: inherit; border-radius: .4rem; border: 1px solid #ccc; }
"#;

const COMMON_SCRIPT: &str = r#"
function toast(notice) {
  const box = document.getElementById('toasts');
  const el = document.createElement('div');
  el.className = 'toast ' + notice.variant;
  const title = document.createElement('strong');
  title.textContent = notice.title;
  const body = document.createElement('div');
  body.textContent = notice.description;
  el.append(title, body);
  box.append(el);
  setTimeout(() => el.remove(), 5000);
}
async function postJson(path, body) {
  const res = await fetch(path, {
    method: 'POST',
    credentials: 'same-origin',
    headers: { 'Content-Type': 'application/json' },
    body: body === undefined ? undefined : JSON.stringify(body),
  });
  const data = await res.json().catch(() => ({}));
  return { ok: res.ok, data };
}
async function signOut() {
  const { data } = await postJson('/auth/logout');
  window.location.href = data.path || '/';
}
"#;

const LANDING_SCRIPT: &str = r#"
async function authenticate(path) {
  const email = document.getElementById('email').value;
  const password = document.getElementById('password').value;
  const { ok, data } = await postJson(path, { email, password });
  if (ok) { window.location.href = '/topics'; } else { toast(data); }
}
"#;

const TOPICS_SCRIPT: &str = r#"
async function beginDialogue(topicId) {
  const { ok, data } = await postJson('/api/dialogues', { topic_id: topicId });
  if (ok) { window.location.href = data.path; } else { toast(data); }
}
"#;

const DIALOGUE_SCRIPT: &str = r#"
const dialogueId = document.body.dataset.dialogue;
const list = document.getElementById('messages');
const input = document.getElementById('input');
const sendButton = document.getElementById('send');
const thinking = document.getElementById('thinking');
const scheme = window.location.protocol === 'https:' ? 'wss' : 'ws';
const socket = new WebSocket(`${scheme}://${window.location.host}/api/dialogues/${dialogueId}/ws`);
let loaded = false;

function bubble(message) {
  const el = document.createElement('div');
  el.className = 'bubble ' + message.role;
  el.textContent = message.content;
  list.append(el);
  el.scrollIntoView({ block: 'end' });
}
function setInputEnabled(enabled) {
  input.disabled = !enabled;
  sendButton.disabled = !enabled;
}
function send() {
  const content = input.value;
  if (!content.trim()) return;
  socket.send(JSON.stringify({ type: 'send_message', content }));
  input.value = '';
}

socket.addEventListener('message', (frame) => {
  const event = JSON.parse(frame.data);
  switch (event.type) {
    case 'loaded':
      loaded = true;
      document.getElementById('title').textContent = event.topic.title;
      document.getElementById('question').textContent = '"' + event.topic.question + '"';
      list.replaceChildren();
      event.messages.forEach(bubble);
      break;
    case 'message_appended':
      bubble(event.message);
      break;
    case 'phase':
      thinking.style.display = event.phase === 'awaiting_reply' ? 'block' : 'none';
      setInputEnabled(event.phase === 'awaiting_input');
      break;
    case 'notice':
      toast(event.notice);
      break;
    case 'navigate':
      setTimeout(() => { window.location.href = event.path; }, 600);
      break;
  }
});
socket.addEventListener('close', () => {
  setInputEnabled(false);
  if (!loaded) { window.location.href = '/topics'; }
});

input.addEventListener('keydown', (e) => {
  if (e.key === 'Enter' && !e.shiftKey) { e.preventDefault(); send(); }
});
document.getElementById('compose').addEventListener('submit', (e) => { e.preventDefault(); send(); });
document.getElementById('end').addEventListener('click', () => {
  socket.send(JSON.stringify({ type: 'end_dialogue' }));
});
setInputEnabled(false);
"#;

/// Escapes text for use in HTML element content and quoted attributes.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn layout(title: &str, body_attrs: &str, body: &str, script: &str) -> Html<String> {
    let mut page = String::with_capacity(body.len() + STYLE.len() + script.len() + 512);
    page.push_str("<!doctype html><html lang=\"en\"><head><meta charset=\"utf-8\">");
    page.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">");
    page.push_str(&format!("<title>{}</title>", escape_html(title)));
    page.push_str("<style>");
    page.push_str(STYLE);
    page.push_str("</style></head>");
    page.push_str(&format!("<body{}>", body_attrs));
    page.push_str(body);
    page.push_str("<div id=\"toasts\"></div><script>");
    page.push_str(COMMON_SCRIPT);
    page.push_str(script);
    page.push_str("</script></body></html>");
    Html(page)
}

fn toast_markup(notice: &Notice) -> String {
    let variant = if notice.is_error() { "destructive" } else { "default" };
    format!(
        "<div class=\"toast {}\"><strong>{}</strong><div>{}</div></div>",
        variant,
        escape_html(&notice.title),
        escape_html(&notice.description)
    )
}

fn topic_card(topic: &Topic) -> String {
    format!(
        "<article class=\"card\"><h2>{}</h2><p class=\"question\">&quot;{}&quot;</p><p>{}</p>\
         <button class=\"button\" onclick=\"beginDialogue('{}')\">Begin Dialogue</button></article>",
        escape_html(&topic.title),
        escape_html(&topic.question),
        escape_html(&topic.description),
        topic.id
    )
}

//=========================================================================================
// Page Handlers
//=========================================================================================

/// GET / - Landing page
pub async fn landing_page(MaybeUser(user): MaybeUser) -> Html<String> {
    let call_to_action = match &user {
        Some(_) => format!(
            "<a class=\"button\" href=\"{}\">Choose a question</a>",
            Route::Topics
        ),
        None => "<div class=\"auth\">\
                 <input id=\"email\" type=\"email\" placeholder=\"Email\">\
                 <input id=\"password\" type=\"password\" placeholder=\"Password\">\
                 <button class=\"button\" onclick=\"authenticate('/auth/login')\">Sign in</button>\
                 <button class=\"button ghost\" onclick=\"authenticate('/auth/signup')\">Sign up</button>\
                 </div>"
            .to_string(),
    };

    let body = format!(
        "<main><section class=\"hero\"><h1>Think deeper through Socratic dialogue</h1>\
         <p>Explore timeless philosophical questions with a tutor that answers with questions, \
         not conclusions.</p>{}</section>\
         <section><h2>How it works</h2><div class=\"steps\">\
         <div class=\"card\"><h3>1. Choose a question</h3><p>Pick a philosophical question that interests you.</p></div>\
         <div class=\"card\"><h3>2. Engage in dialogue</h3><p>Share your thoughts and answer probing questions.</p></div>\
         <div class=\"card\"><h3>3. Discover fallacies</h3><p>Learn to spot the fallacies in your own reasoning.</p></div>\
         </div></section></main>",
        call_to_action
    );
    layout("Socratic Tutor", "", &body, LANDING_SCRIPT)
}

/// GET /topics - Topic picker
///
/// Anonymous visitors see the catalog too; starting a dialogue is what needs a user.
pub async fn topics_page(State(app_state): State<Arc<AppState>>) -> Html<String> {
    let sink = RecordingSink::new();
    let topics = catalog::load_topics(app_state.backend.db.as_ref(), &sink).await;
    let cards: String = topics.iter().map(topic_card).collect();
    let toasts: String = sink.notices().iter().map(toast_markup).collect();

    let body = format!(
        "<header class=\"bar\"><a class=\"button ghost\" href=\"{}\">Back</a>\
         <strong>Choose a question</strong>\
         <button class=\"button ghost\" onclick=\"signOut()\">Sign Out</button></header>\
         <main><div class=\"grid\">{}</div></main><div class=\"auth\">{}</div>",
        Route::Landing,
        cards,
        toasts
    );
    layout("Topics", "", &body, TOPICS_SCRIPT)
}

/// GET /dialogue/{id} - Dialogue shell; contents arrive over the dialogue channel
pub async fn dialogue_page(Path(dialogue_id): Path<Uuid>) -> Html<String> {
    let body = format!(
        "<header class=\"bar\"><a class=\"button ghost\" href=\"{}\">Topics</a>\
         <div><strong id=\"title\"></strong><div id=\"question\" class=\"question\"></div></div>\
         <button id=\"end\" class=\"button ghost\">End</button></header>\
         <main><div id=\"messages\"></div><p id=\"thinking\">Thinking...</p>\
         <form id=\"compose\" class=\"compose\"><textarea id=\"input\" placeholder=\"Share your thoughts...\"></textarea>\
         <button id=\"send\" class=\"button\" type=\"submit\">Send</button></form></main>",
        Route::Topics
    );
    let attrs = format!(" data-dialogue=\"{}\"", dialogue_id);
    layout("Dialogue", &attrs, &body, DIALOGUE_SCRIPT)
}
