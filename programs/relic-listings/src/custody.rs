// Token custody manager. The only code in the program that moves or locks
// the deposited NFT: the registry PDA is approved as delegate for the single
// unit and the account is frozen through the Metaplex edition, so the owner
// cannot transfer the token out from under an active instrument.

use anchor_lang::prelude::*;
use anchor_spl::token::{self, Approve, Revoke, TokenAccount, Transfer};
use mpl_token_metadata::instructions::{
    FreezeDelegatedAccountCpi, FreezeDelegatedAccountCpiAccounts, ThawDelegatedAccountCpi,
    ThawDelegatedAccountCpiAccounts,
};

use crate::state::{InstrumentRegistry, ListingsError};

pub struct FreezeParams<'a, 'b> {
    /// CHECK
    pub delegate: AccountInfo<'a>,
    /// CHECK
    pub token_account: AccountInfo<'a>,
    /// CHECK
    pub edition: AccountInfo<'a>,
    /// CHECK
    pub mint: AccountInfo<'a>,
    /// CHECK
    pub token_program: AccountInfo<'a>,
    /// CHECK
    pub metadata_program: AccountInfo<'a>,
    pub signer_seeds: &'b [&'b [&'b [u8]]],
}

pub fn freeze(params: FreezeParams) -> Result<()> {
    FreezeDelegatedAccountCpi::new(
        &params.metadata_program,
        FreezeDelegatedAccountCpiAccounts {
            delegate: &params.delegate,
            token_account: &params.token_account,
            edition: &params.edition,
            mint: &params.mint,
            token_program: &params.token_program,
        },
    )
    .invoke_signed(params.signer_seeds)?;

    Ok(())
}

pub fn thaw(params: FreezeParams) -> Result<()> {
    ThawDelegatedAccountCpi::new(
        &params.metadata_program,
        ThawDelegatedAccountCpiAccounts {
            delegate: &params.delegate,
            token_account: &params.token_account,
            edition: &params.edition,
            mint: &params.mint,
            token_program: &params.token_program,
        },
    )
    .invoke_signed(params.signer_seeds)?;

    Ok(())
}

/// Approves the registry PDA as delegate for the single unit and freezes
/// the account. The owner signs the approval.
pub fn delegate_and_freeze_token_account<'info>(
    registry: &Account<'info, InstrumentRegistry>,
    token_program: AccountInfo<'info>,
    token_account: AccountInfo<'info>,
    authority: AccountInfo<'info>,
    mint: AccountInfo<'info>,
    edition: AccountInfo<'info>,
    metadata_program: AccountInfo<'info>,
) -> Result<()> {
    token::approve(
        CpiContext::new(
            token_program.clone(),
            Approve {
                to: token_account.clone(),
                delegate: registry.to_account_info(),
                authority,
            },
        ),
        1,
    )?;

    let signer_seeds: &[&[&[u8]]] = &[&[
        InstrumentRegistry::PREFIX,
        registry.mint.as_ref(),
        registry.authority.as_ref(),
        &[registry.bump],
    ]];

    freeze(FreezeParams {
        delegate: registry.to_account_info(),
        token_account,
        edition,
        mint,
        token_program,
        metadata_program,
        signer_seeds,
    })
}

/// Thaws the account with the registry signing as delegate, then revokes
/// the delegation. Only valid once no instrument flag remains set.
pub fn thaw_and_revoke_token_account<'info>(
    registry: &Account<'info, InstrumentRegistry>,
    token_program: AccountInfo<'info>,
    token_account: AccountInfo<'info>,
    authority: AccountInfo<'info>,
    mint: AccountInfo<'info>,
    edition: AccountInfo<'info>,
    metadata_program: AccountInfo<'info>,
) -> Result<()> {
    let signer_seeds: &[&[&[u8]]] = &[&[
        InstrumentRegistry::PREFIX,
        registry.mint.as_ref(),
        registry.authority.as_ref(),
        &[registry.bump],
    ]];

    thaw(FreezeParams {
        delegate: registry.to_account_info(),
        token_account: token_account.clone(),
        edition,
        mint,
        token_program: token_program.clone(),
        metadata_program,
        signer_seeds,
    })?;

    token::revoke(CpiContext::new(
        token_program,
        Revoke {
            source: token_account,
            authority,
        },
    ))?;

    Ok(())
}

/// Thaws and moves the single unit with the registry PDA signing as the
/// recorded delegate. Used for exercise, repossession and hire handover;
/// a caller that is not the delegate fails inside the token program before
/// any state change lands.
pub fn thaw_and_transfer_from_token_account<'info>(
    registry: &Account<'info, InstrumentRegistry>,
    token_program: AccountInfo<'info>,
    from: AccountInfo<'info>,
    to: AccountInfo<'info>,
    mint: AccountInfo<'info>,
    edition: AccountInfo<'info>,
    metadata_program: AccountInfo<'info>,
) -> Result<()> {
    let signer_seeds: &[&[&[u8]]] = &[&[
        InstrumentRegistry::PREFIX,
        registry.mint.as_ref(),
        registry.authority.as_ref(),
        &[registry.bump],
    ]];

    thaw(FreezeParams {
        delegate: registry.to_account_info(),
        token_account: from.clone(),
        edition,
        mint,
        token_program: token_program.clone(),
        metadata_program,
        signer_seeds,
    })?;

    token::transfer(
        CpiContext::new_with_signer(
            token_program,
            Transfer {
                from,
                to,
                authority: registry.to_account_info(),
            },
            signer_seeds,
        ),
        1,
    )?;

    Ok(())
}

/// Puts a deposit account under custody, tolerating a stale delegation
/// left by an earlier listing: an unfrozen foreign delegate is revoked and
/// replaced, a frozen foreign delegate is rejected, and an account already
/// held by this registry is left as is.
pub fn acquire_custody<'info>(
    registry: &Account<'info, InstrumentRegistry>,
    token_program: AccountInfo<'info>,
    deposit_token_account: &Account<'info, TokenAccount>,
    authority: AccountInfo<'info>,
    mint: AccountInfo<'info>,
    edition: AccountInfo<'info>,
    metadata_program: AccountInfo<'info>,
) -> Result<()> {
    if deposit_token_account.delegate.is_some() {
        let delegate = deposit_token_account.delegate.unwrap();

        if !deposit_token_account.is_frozen() && delegate != registry.key() {
            token::revoke(CpiContext::new(
                token_program.clone(),
                Revoke {
                    source: deposit_token_account.to_account_info(),
                    authority: authority.clone(),
                },
            ))?;

            delegate_and_freeze_token_account(
                registry,
                token_program,
                deposit_token_account.to_account_info(),
                authority,
                mint,
                edition,
                metadata_program,
            )?;
        } else if delegate != registry.key() || deposit_token_account.delegated_amount != 1 {
            return err!(ListingsError::InvalidDelegate);
        }
    } else {
        delegate_and_freeze_token_account(
            registry,
            token_program,
            deposit_token_account.to_account_info(),
            authority,
            mint,
            edition,
            metadata_program,
        )?;
    }

    Ok(())
}

/// Releases a deposit account once the registry is clear. Handles the case
/// where the account was never frozen (only delegated) by revoking alone.
pub fn release_custody<'info>(
    registry: &Account<'info, InstrumentRegistry>,
    token_program: AccountInfo<'info>,
    deposit_token_account: &Account<'info, TokenAccount>,
    authority: AccountInfo<'info>,
    mint: AccountInfo<'info>,
    edition: AccountInfo<'info>,
    metadata_program: AccountInfo<'info>,
) -> Result<()> {
    if deposit_token_account.is_frozen() {
        thaw_and_revoke_token_account(
            registry,
            token_program,
            deposit_token_account.to_account_info(),
            authority,
            mint,
            edition,
            metadata_program,
        )?;
    } else {
        token::revoke(CpiContext::new(
            token_program,
            Revoke {
                source: deposit_token_account.to_account_info(),
                authority,
            },
        ))?;
    }

    Ok(())
}
