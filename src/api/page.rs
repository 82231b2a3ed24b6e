//! Static markup for the review dashboard.

const SESSION_PLACEHOLDER: &str = "{{SESSION_ID}}";

/// Session ids are base64url, so they can be substituted verbatim.
pub fn render_dashboard(session_id: &str) -> String {
    DASHBOARD_HTML.replace(SESSION_PLACEHOLDER, session_id)
}

const DASHBOARD_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>Outbox Review</title>
    <style>
        * { box-sizing: border-box; }
        body { font-family: -apple-system, system-ui, sans-serif; max-width: 800px; margin: 0 auto; padding: 20px; background: #f5f5f5; }
        h1 { color: #333; border-bottom: 2px solid #4CAF50; padding-bottom: 10px; }
        .status { padding: 15px; border-radius: 8px; margin-bottom: 20px; }
        .status.idle { background: #e3f2fd; color: #1565c0; }
        .status.pending { background: #fff3e0; color: #e65100; }
        .card { background: white; border-radius: 8px; padding: 20px; box-shadow: 0 2px 4px rgba(0,0,0,0.1); }
        .field { margin-bottom: 8px; }
        .field label { font-weight: 600; color: #666; display: inline-block; width: 80px; }
        .body { background: #fafafa; border: 1px solid #eee; border-radius: 4px; padding: 15px; white-space: pre-wrap; max-height: 400px; overflow-y: auto; }
        .buttons { display: flex; gap: 15px; margin-top: 20px; }
        button { flex: 1; padding: 15px; font-size: 16px; font-weight: 600; border: none; border-radius: 8px; cursor: pointer; color: white; }
        button:disabled { opacity: 0.5; cursor: not-allowed; }
        .approve { background: #4CAF50; }
        .reject { background: #f44336; }
        .history { margin-top: 30px; font-size: 14px; }
        .history div { padding: 8px; border-bottom: 1px solid #eee; }
        .history .approved { border-left: 3px solid #4CAF50; }
        .history .rejected, .history .timeout { border-left: 3px solid #f44336; }
        .footer { text-align: center; color: #999; font-size: 12px; margin-top: 30px; }
    </style>
</head>
<body>
    <h1>Outbox</h1>
    <div id="status" class="status idle">Waiting for emails to review...</div>

    <div id="card" class="card" style="display: none;">
        <div class="field"><label>To:</label><span id="to"></span></div>
        <div class="field"><label>Subject:</label><span id="subject"></span></div>
        <div class="field"><label>Expires:</label><span id="expires"></span></div>
        <div class="body" id="body"></div>
        <div class="buttons">
            <button class="approve" id="approve" onclick="decide('approve')">Approve &amp; send</button>
            <button class="reject" id="reject" onclick="decide('reject')">Reject</button>
        </div>
    </div>

    <div class="history">
        <h2>History</h2>
        <div id="history"></div>
    </div>

    <div class="footer">Only you can approve emails from this page. Do not share its URL.</div>

    <script>
        const sessionID = "{{SESSION_ID}}";
        let pollTimer = null;
        let expiresAt = null;

        function setButtons(enabled) {
            document.getElementById("approve").disabled = !enabled;
            document.getElementById("reject").disabled = !enabled;
        }

        async function refresh() {
            try {
                const pending = await (await fetch("/api/pending/" + sessionID)).json();
                const status = document.getElementById("status");
                const card = document.getElementById("card");
                if (pending.pending) {
                    status.className = "status pending";
                    status.textContent = "Email pending approval";
                    document.getElementById("to").textContent = pending.to;
                    document.getElementById("subject").textContent = pending.subject;
                    document.getElementById("body").textContent = pending.body;
                    expiresAt = Date.now() + pending.expiresIn * 1000;
                    tickExpiry();
                    card.style.display = "block";
                    setButtons(true);
                } else {
                    status.className = "status idle";
                    status.textContent = "Waiting for emails to review...";
                    card.style.display = "none";
                    expiresAt = null;
                }
                await refreshHistory();
            } catch (err) {
                console.error("refresh failed:", err);
            }
        }

        function tickExpiry() {
            if (expiresAt === null) {
                return;
            }
            const left = Math.max(0, Math.round((expiresAt - Date.now()) / 1000));
            document.getElementById("expires").textContent = left + "s";
        }

        async function refreshHistory() {
            const entries = await (await fetch("/api/history/" + sessionID)).json();
            const list = document.getElementById("history");
            list.replaceChildren();
            for (const entry of entries) {
                const item = document.createElement("div");
                item.className = entry.outcome;
                item.textContent = entry.outcome + ": " + entry.to + " - " + entry.subject +
                    " (" + new Date(entry.timestamp).toLocaleTimeString() + ")";
                list.appendChild(item);
            }
        }

        async function decide(verdict) {
            setButtons(false);
            try {
                const resp = await (await fetch("/api/" + verdict + "/" + sessionID, { method: "POST" })).json();
                if (!resp.success) {
                    alert(resp.error);
                }
            } catch (err) {
                alert("Error: " + err);
            }
            refresh();
        }

        const events = new EventSource("/events/" + sessionID);
        events.onmessage = () => refresh();
        events.onerror = () => {
            if (pollTimer === null) {
                pollTimer = setInterval(refresh, 2000);
            }
        };

        setInterval(tickExpiry, 1000);
        refresh();
    </script>
</body>
</html>
"#;
