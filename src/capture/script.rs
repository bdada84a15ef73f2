//! Page-side listener.
//!
//! The script is idempotent: every drain re-installs the listener when a
//! navigation has dropped it, then empties the bounded page queue. The queue
//! is mirrored into `sessionStorage` so events queued just before a
//! same-origin navigation are picked up by the next drain. Selector
//! derivation, debouncing and de-duplication happen host-side.

/// Window property holding the capture state; also identifies drain scripts
pub const CAPTURE_KEY: &str = "__stepReplayCapture";

const DRAIN_TEMPLATE: &str = r#"(() => {
  const KEY = '__stepReplayCapture';
  const CAP = __QUEUE_CAP__;
  let installed = true;
  if (!window[KEY]) {
    installed = false;
    const load = () => {
      try {
        return JSON.parse(sessionStorage.getItem(KEY) || '{"queue":[],"dropped":0}');
      } catch (e) {
        return { queue: [], dropped: 0 };
      }
    };
    const state = load();
    state.save = () => {
      try {
        sessionStorage.setItem(KEY, JSON.stringify({ queue: state.queue, dropped: state.dropped }));
      } catch (e) {}
    };
    window[KEY] = state;
    const describe = (el) => {
      const path = [];
      let node = el;
      while (node && node.nodeType === 1) {
        let index = 1;
        let sib = node.previousElementSibling;
        while (sib) {
          if (sib.tagName === node.tagName) index++;
          sib = sib.previousElementSibling;
        }
        path.unshift({ tag: node.tagName.toLowerCase(), index });
        node = node.parentElement;
      }
      const id = el.id || null;
      let idUnique = false;
      if (id) {
        try {
          idUnique = document.querySelectorAll('#' + CSS.escape(id)).length === 1;
        } catch (e) {
          idUnique = false;
        }
      }
      const label = (el.getAttribute('aria-label') || el.getAttribute('placeholder') ||
        el.getAttribute('name') || el.innerText || '').toString().trim().slice(0, 80);
      return {
        tag: el.tagName.toLowerCase(),
        id,
        idUnique,
        path,
        label,
        inputType: (el.getAttribute('type') || '').toLowerCase(),
      };
    };
    const push = (type, el, extra) => {
      if (!el || el.nodeType !== 1) return;
      state.queue.push(Object.assign({ type, ts: Date.now(), element: describe(el) }, extra || {}));
      while (state.queue.length > CAP) {
        state.queue.shift();
        state.dropped++;
      }
      state.save();
    };
    document.addEventListener('click', (e) => push('click', e.target), true);
    document.addEventListener('input', (e) => push('input', e.target, { value: String(e.target.value ?? '') }), true);
    document.addEventListener('change', (e) => {
      const t = e.target;
      push('change', t, {
        value: String(t.value ?? ''),
        checked: typeof t.checked === 'boolean' ? t.checked : null,
      });
    }, true);
    document.addEventListener('blur', (e) => push('blur', e.target), true);
  }
  const state = window[KEY];
  const events = state.queue.splice(0, state.queue.length);
  const dropped = state.dropped;
  state.dropped = 0;
  state.save();
  return { installed, dropped, now: Date.now(), events };
})()"#;

/// Build the install-and-drain script for a queue bound
pub fn drain_script(queue_cap: usize) -> String {
    DRAIN_TEMPLATE.replace("__QUEUE_CAP__", &queue_cap.max(1).to_string())
}

/// Whether a script handed to a driver is a capture drain
pub fn is_drain_script(script: &str) -> bool {
    script.contains(CAPTURE_KEY)
}
