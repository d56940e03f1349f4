//! Operator-assisted coin programming.
//!
//! Coins are flashed with an external SWD programmer. The manual provisioner
//! prints the key material the programmer needs and waits for the operator
//! to confirm that the coin was written and verified, or to report that
//! verification failed.

use keykeeper_core::Coin;
use keykeeper_storage::{CoinProvisioner, ProvisionError};
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Stdin, Stdout,
};
use tokio::sync::Mutex;

pub struct ManualProvisioner<R, W> {
    input: Mutex<BufReader<R>>,
    output: Mutex<W>,
}

impl ManualProvisioner<Stdin, Stdout> {
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }
}

impl<R, W> ManualProvisioner<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(input: R, output: W) -> Self {
        Self {
            input: Mutex::new(BufReader::new(input)),
            output: Mutex::new(output),
        }
    }

    pub fn into_output(self) -> W {
        self.output.into_inner()
    }
}

impl<R, W> CoinProvisioner for ManualProvisioner<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    async fn provision(&self, name: &str, coin: &Coin) -> Result<(), ProvisionError> {
        let sheet = format!(
            "Program the coin for {name} with:\n\
             \x20 address    {}\n\
             \x20 irk        {}\n\
             \x20 ltk        {}\n\
             \x20 space key  {}\n\
             Press Enter once the coin is programmed and verified, \
             type f if verification failed, or n to cancel: ",
            coin.address,
            coin.irk.to_hex(),
            coin.ltk.to_hex(),
            coin.space_key.to_hex(),
        );

        {
            let mut output = self.output.lock().await;
            output.write_all(sheet.as_bytes()).await?;
            output.flush().await?;
        }

        let mut answer = String::new();
        let read = self.input.lock().await.read_line(&mut answer).await?;
        match answer.trim() {
            _ if read == 0 => Err(ProvisionError::Cancelled),
            "" | "y" | "Y" | "yes" => Ok(()),
            "f" | "F" | "failed" => Err(ProvisionError::VerificationFailed(format!(
                "operator reported a failed read-back of {}",
                coin.address
            ))),
            _ => Err(ProvisionError::Cancelled),
        }
    }
}
