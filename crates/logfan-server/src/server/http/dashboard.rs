pub const DASHBOARD_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
  <title>logfan</title>
  <style>
    body { font-family: sans-serif; margin: 2rem; }
    label { display: inline-block; width: 10rem; }
    #inputs > * { margin-bottom: 0.4rem; }
    pre { background: #f4f4f4; padding: 0.75rem; }
  </style>
</head>
<body>
  <h1>Performance Dashboard</h1>
  <div id="inputs">
    <label for="chunk">Chunk (bytes):</label>
    <input type="number" id="chunk" value="4096" min="1"><br>
    <label for="workers">No. of Workers:</label>
    <input type="number" id="workers" value="3" min="1"><br>
    <label for="delay">Delay (s):</label>
    <input type="number" id="delay" value="0.5" min="0" step="0.1"><br>
    <label for="tofile">To File:</label>
    <input type="checkbox" id="tofile"><br>
    <label for="split">Split Chunks:</label>
    <input type="checkbox" id="split"><br>
    <label for="primaryLogFile">Primary Log File:</label>
    <input type="text" id="primaryLogFile" value="part_aa.log"><br>
    <button id="startButton" onclick="startProcessing()">Start</button>
    <button onclick="stopProcessing()">Stop</button>
  </div>
  <p id="message"></p>
  <pre id="metrics"></pre>
  <script>
    let intervalId;

    function fetchMetrics() {
      fetch('/metrics')
        .then(response => response.json())
        .then(data => {
          document.getElementById('metrics').innerText = JSON.stringify(data, null, 2);
        });
    }

    function startProcessing() {
      const startButton = document.getElementById('startButton');
      startButton.disabled = true;

      const body = JSON.stringify({
        chunk: parseInt(document.getElementById('chunk').value, 10),
        workers: parseInt(document.getElementById('workers').value, 10),
        delay: parseFloat(document.getElementById('delay').value),
        tofile: document.getElementById('tofile').checked,
        split: document.getElementById('split').checked,
        primaryLogFile: document.getElementById('primaryLogFile').value,
      });

      fetch('/start', {
        method: 'POST',
        headers: { 'Content-Type': 'application/json' },
        body,
      })
        .then(async response => {
          if (response.ok) {
            document.getElementById('message').innerText = 'Run started.';
            clearInterval(intervalId);
            intervalId = setInterval(fetchMetrics, 1000);
          } else {
            document.getElementById('message').innerText = await response.text();
            startButton.disabled = false;
          }
        })
        .catch(error => {
          document.getElementById('message').innerText = 'Error starting run: ' + error;
          startButton.disabled = false;
        });
    }

    function stopProcessing() {
      fetch('/stop')
        .then(async response => {
          document.getElementById('message').innerText = await response.text();
          if (response.ok) {
            document.getElementById('startButton').disabled = false;
            clearInterval(intervalId);
            fetchMetrics();
          }
        })
        .catch(error => {
          document.getElementById('message').innerText = 'Error stopping run: ' + error;
        });
    }
  </script>
</body>
</html>
"#;
