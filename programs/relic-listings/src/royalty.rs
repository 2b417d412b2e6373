use std::slice::Iter;

use anchor_lang::prelude::*;
use anchor_lang::solana_program::program::invoke;
use anchor_spl::token::TokenAccount;
use mpl_token_metadata::accounts::Metadata;

use crate::interest::fee_from_basis_points;
use crate::state::ListingsError;

pub fn assert_metadata_valid<'info>(
    metadata: &AccountInfo<'info>,
    token_account: &Account<'info, TokenAccount>,
) -> Result<()> {
    let (key, _) = Metadata::find_pda(&token_account.mint);

    if key != metadata.key() {
        return err!(ListingsError::DerivedKeyInvalid);
    }

    if metadata.data_is_empty() {
        return err!(ListingsError::MetadataDoesntExist);
    }

    Ok(())
}

/// Pays the seller-fee share of `amount` to the mint's creators, pulled
/// from the metadata record and matched positionally against the remaining
/// accounts. Returns what is left for the counterparty; rounding dust goes
/// to the party posting the NFT.
pub fn pay_creator_royalties<'info>(
    remaining_accounts: &mut Iter<AccountInfo<'info>>,
    amount: u64,
    mint: &AccountInfo<'info>,
    metadata_info: &AccountInfo<'info>,
    fee_payer: &AccountInfo<'info>,
    token_account: &Account<'info, TokenAccount>,
) -> Result<u64> {
    assert_metadata_valid(metadata_info, token_account)?;

    let data = metadata_info.try_borrow_data()?;
    let metadata = Metadata::safe_deserialize(&data)
        .map_err(|_| ListingsError::MetadataDoesntExist)?;
    drop(data);

    if metadata.mint != mint.key() {
        return err!(ListingsError::InvalidMint);
    }

    let total_fee = fee_from_basis_points(amount, metadata.seller_fee_basis_points as u32)?;
    let mut remaining_fee = total_fee;
    let remaining_amount = amount
        .checked_sub(total_fee)
        .ok_or(ListingsError::NumericalOverflow)?;

    match metadata.creators {
        Some(creators) => {
            for creator in creators {
                let share = creator.share as u128;
                let creator_fee = share
                    .checked_mul(total_fee as u128)
                    .ok_or(ListingsError::NumericalOverflow)?
                    .checked_div(100)
                    .ok_or(ListingsError::NumericalOverflow)? as u64;
                remaining_fee = remaining_fee
                    .checked_sub(creator_fee)
                    .ok_or(ListingsError::NumericalOverflow)?;

                let creator_info = next_account_info(remaining_accounts)?;
                require_keys_eq!(
                    creator_info.key(),
                    creator.address,
                    ListingsError::DerivedKeyInvalid
                );

                if creator_fee > 0 {
                    invoke(
                        &anchor_lang::solana_program::system_instruction::transfer(
                            &fee_payer.key(),
                            &creator_info.key(),
                            creator_fee,
                        ),
                        &[creator_info.to_account_info(), fee_payer.to_account_info()],
                    )?;
                }
            }
        }
        None => {
            msg!("No creators found in metadata");
        }
    }

    remaining_amount
        .checked_add(remaining_fee)
        .ok_or(ListingsError::NumericalOverflow.into())
}
